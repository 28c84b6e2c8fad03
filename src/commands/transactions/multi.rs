use crate::commands::{CommandError, RequestContext};
use crate::resp::RespValue;

/// Handles MULTI: opens a transaction for this connection. Nesting is an
/// error.
pub async fn multi(ctx: &RequestContext, args: &[String]) -> Result<RespValue, CommandError> {
    if !args.is_empty() {
        return Err(CommandError::WrongNumberOfArguments("multi".to_string()));
    }

    ctx.transactions.begin(&ctx.conn_id).await?;

    Ok(RespValue::SimpleString("OK".to_string()))
}
