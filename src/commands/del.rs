use crate::commands::{CommandError, RequestContext};
use crate::resp::RespValue;

/// Handles DEL: removes every named key, answering with how many live
/// entries were removed.
pub async fn del(ctx: &RequestContext, args: &[String]) -> Result<RespValue, CommandError> {
    if args.is_empty() {
        return Err(CommandError::WrongNumberOfArguments("del".to_string()));
    }

    let removed = ctx.keyspace.remove(args).await;

    Ok(RespValue::Integer(removed as i64))
}
