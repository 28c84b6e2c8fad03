use crate::commands::{CommandError, RequestContext};
use crate::resp::RespValue;

/// Handles TYPE: `string`, `stream`, or `none` for an absent key.
pub async fn type_command(ctx: &RequestContext, args: &[String]) -> Result<RespValue, CommandError> {
    let [key] = args else {
        return Err(CommandError::WrongNumberOfArguments("type".to_string()));
    };

    let tag = match ctx.keyspace.read(key).await {
        Some(record) => record.type_tag(),
        None => "none",
    };

    Ok(RespValue::SimpleString(tag.to_string()))
}
