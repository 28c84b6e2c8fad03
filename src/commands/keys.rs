use globset::Glob;

use crate::commands::{CommandError, RequestContext};
use crate::resp::RespValue;

pub async fn keys(ctx: &RequestContext, args: &[String]) -> Result<RespValue, CommandError> {
    let [pattern] = args else {
        return Err(CommandError::WrongNumberOfArguments("keys".to_string()));
    };

    let matcher = Glob::new(pattern)
        .map_err(|e| CommandError::InvalidGlobPattern(e.to_string()))?
        .compile_matcher();

    let mut names = ctx.keyspace.keys().await;
    names.sort();

    let matched = names
        .into_iter()
        .filter(|name| matcher.is_match(name))
        .map(RespValue::BulkString)
        .collect();

    Ok(RespValue::Array(matched))
}
