//! REPLCONF: replication handshake configuration and acknowledgements.

use crate::commands::{CommandError, RequestContext};
use crate::resp::RespValue;

/// Handles REPLCONF.
///
/// * `listening-port` / `capa` during the handshake are acknowledged with
///   `OK`.
/// * `GETACK *` (sent by a primary over the replication link) answers
///   with `REPLCONF ACK <offset>` carrying this replica's applied-bytes
///   counter.
/// * `ACK <offset>` (sent by a replica back to its primary) is routed to
///   that replica's ack signal and produces no reply bytes.
pub async fn replconf(ctx: &RequestContext, args: &[String]) -> Result<RespValue, CommandError> {
    let Some(subcommand) = args.first() else {
        return Err(CommandError::WrongNumberOfArguments("replconf".to_string()));
    };

    match subcommand.to_uppercase().as_str() {
        "GETACK" => Ok(RespValue::Array(vec![
            RespValue::BulkString("REPLCONF".to_string()),
            RespValue::BulkString("ACK".to_string()),
            RespValue::BulkString(ctx.replication.offset().to_string()),
        ])),
        "ACK" => {
            ctx.replication.record_ack(&ctx.conn_id).await;
            // No reply bytes go back to the replica.
            Ok(RespValue::FlatArray(vec![]))
        }
        _ => Ok(RespValue::SimpleString("OK".to_string())),
    }
}
