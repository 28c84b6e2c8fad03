use crate::commands::{router, CommandError, RequestContext};
use crate::resp::RespValue;

/// Handles EXEC: runs the queued commands in arrival order as one logical
/// unit and answers with their replies in the same order.
///
/// There is no rollback: a failing command contributes its error value and
/// execution continues. An empty queue answers with an empty array.
pub async fn exec(ctx: &RequestContext, args: &[String]) -> Result<RespValue, CommandError> {
    if !args.is_empty() {
        return Err(CommandError::WrongNumberOfArguments("exec".to_string()));
    }

    let queued = ctx
        .transactions
        .take(&ctx.conn_id)
        .await
        .map_err(|_| CommandError::ExecWithoutMulti)?;

    let mut replies = Vec::with_capacity(queued.len());

    for command in &queued {
        let reply = match Box::pin(router::execute(command, ctx)).await {
            Ok(value) => value,
            Err(error) => error.as_value(),
        };

        replies.push(reply);
    }

    Ok(RespValue::Array(replies))
}
