use crate::commands::{CommandError, RequestContext};
use crate::resp::RespValue;

/// Handles DISCARD: drops the connection's queued commands.
pub async fn discard(ctx: &RequestContext, args: &[String]) -> Result<RespValue, CommandError> {
    if !args.is_empty() {
        return Err(CommandError::WrongNumberOfArguments("discard".to_string()));
    }

    ctx.transactions
        .discard(&ctx.conn_id)
        .await
        .map_err(|_| CommandError::DiscardWithoutMulti)?;

    Ok(RespValue::SimpleString("OK".to_string()))
}
