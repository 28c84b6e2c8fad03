use crate::commands::{CommandError, RequestContext};
use crate::resp::RespValue;

/// Handles INCR.
///
/// A missing or expired key is initialized to 1 with no TTL; a value that
/// does not parse as a signed 64-bit integer is an error and stays
/// unmodified.
pub async fn incr(ctx: &RequestContext, args: &[String]) -> Result<RespValue, CommandError> {
    let [key] = args else {
        return Err(CommandError::WrongNumberOfArguments("incr".to_string()));
    };

    let incremented = ctx.keyspace.increment(key).await?;

    Ok(RespValue::Integer(incremented))
}
