//! Verb dispatch and the per-request execution context.

use std::sync::Arc;

use crate::commands::{
    command_docs, config_get, del, echo, get, incr, info, keys, ping, psync, replconf, set,
    transactions, type_command, wait, xadd, xrange, xread, Command, CommandError,
};
use crate::config::Config;
use crate::replication::Replication;
use crate::resp::RespValue;
use crate::store::Keyspace;
use crate::transactions::TransactionRegistry;

/// Everything a handler can touch, plus the identity of the connection
/// the request arrived on.
#[derive(Clone)]
pub struct RequestContext {
    pub keyspace: Arc<Keyspace>,
    pub replication: Arc<Replication>,
    pub transactions: Arc<TransactionRegistry>,
    pub config: Arc<Config>,
    pub conn_id: String,
}

/// What dispatching produced and whether the command actually ran.
///
/// `executed` is false for queued commands and failures; the pipeline uses
/// it to decide on replication fan-out.
#[derive(Debug, PartialEq)]
pub struct DispatchOutcome {
    pub response: RespValue,
    pub executed: bool,
}

/// Routes a command, short-circuiting into the connection's transaction
/// queue when one is open and the verb is not MULTI/EXEC/DISCARD.
pub async fn dispatch(command: Command, ctx: &RequestContext) -> DispatchOutcome {
    let controls_transaction = matches!(command.name.as_str(), "MULTI" | "EXEC" | "DISCARD");

    if !controls_transaction && ctx.transactions.is_active(&ctx.conn_id).await {
        return match ctx.transactions.queue(&ctx.conn_id, command).await {
            Ok(()) => DispatchOutcome {
                response: RespValue::SimpleString("QUEUED".to_string()),
                executed: false,
            },
            Err(error) => DispatchOutcome {
                response: CommandError::from(error).as_value(),
                executed: false,
            },
        };
    }

    match execute(&command, ctx).await {
        Ok(response) => DispatchOutcome {
            response,
            executed: true,
        },
        Err(error) => DispatchOutcome {
            response: error.as_value(),
            executed: false,
        },
    }
}

/// Runs a command against its handler. Lookup is by the already-uppercased
/// verb.
pub async fn execute(command: &Command, ctx: &RequestContext) -> Result<RespValue, CommandError> {
    match command.name.as_str() {
        "PING" => ping::ping(&command.args),
        "ECHO" => echo::echo(&command.args),
        "GET" => get::get(ctx, &command.args).await,
        "SET" => set::set(ctx, &command.args).await,
        "DEL" => del::del(ctx, &command.args).await,
        "INCR" => incr::incr(ctx, &command.args).await,
        "KEYS" => keys::keys(ctx, &command.args).await,
        "TYPE" => type_command::type_command(ctx, &command.args).await,
        "CONFIG" => config_get::config_get(ctx, &command.args),
        "INFO" => info::info(ctx, &command.args).await,
        "COMMAND" => command_docs::command_docs(&command.args),
        "XADD" => xadd::xadd(ctx, &command.args).await,
        "XRANGE" => xrange::xrange(ctx, &command.args).await,
        "XREAD" => xread::xread(ctx, &command.args).await,
        "MULTI" => transactions::multi(ctx, &command.args).await,
        "EXEC" => transactions::exec(ctx, &command.args).await,
        "DISCARD" => transactions::discard(ctx, &command.args).await,
        "REPLCONF" => replconf::replconf(ctx, &command.args).await,
        "PSYNC" => psync::psync(ctx, &command.args).await,
        "WAIT" => wait::wait(ctx, &command.args).await,
        unknown => Err(CommandError::UnknownCommand(unknown.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::test_context;

    #[tokio::test]
    async fn test_dispatch_executes_outside_transactions() {
        let ctx = test_context().await;

        let outcome = dispatch(Command::from_parts("PING", &[]), &ctx).await;
        assert_eq!(
            outcome.response,
            RespValue::SimpleString("PONG".to_string())
        );
        assert!(outcome.executed);
    }

    #[tokio::test]
    async fn test_dispatch_queues_inside_transactions() {
        let ctx = test_context().await;

        dispatch(Command::from_parts("MULTI", &[]), &ctx).await;

        let outcome = dispatch(Command::from_parts("INCR", &["c"]), &ctx).await;
        assert_eq!(
            outcome.response,
            RespValue::SimpleString("QUEUED".to_string())
        );
        assert!(!outcome.executed);

        // The queued INCR has not touched the keyspace.
        assert!(ctx.keyspace.read("c").await.is_none());

        let outcome = dispatch(Command::from_parts("EXEC", &[]), &ctx).await;
        assert_eq!(
            outcome.response,
            RespValue::Array(vec![RespValue::Integer(1)])
        );
        assert!(outcome.executed);
    }

    #[tokio::test]
    async fn test_dispatch_reports_unknown_verbs() {
        let ctx = test_context().await;

        let outcome = dispatch(Command::from_parts("FROB", &[]), &ctx).await;
        assert_eq!(
            outcome.response,
            RespValue::SimpleError("ERR unknown command 'FROB'".to_string())
        );
        assert!(!outcome.executed);
    }

    #[tokio::test]
    async fn test_failed_commands_are_not_marked_executed() {
        let ctx = test_context().await;

        ctx.keyspace.write("word", "abc".to_string(), 0).await;

        let outcome = dispatch(Command::from_parts("INCR", &["word"]), &ctx).await;
        assert!(matches!(outcome.response, RespValue::SimpleError(_)));
        assert!(!outcome.executed);
    }
}
