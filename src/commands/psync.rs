//! PSYNC: full-resync entry point on the primary.

use crate::commands::{CommandError, RequestContext};
use crate::resp::RespValue;

/// Handles `PSYNC ? -1`.
///
/// The reply is a flat concatenation of the `FULLRESYNC <replid> 0` line
/// and the snapshot payload framed as a bulk length header with no
/// trailing terminator. The connection pipeline registers the caller as a
/// replica once the reply is on the wire.
pub async fn psync(ctx: &RequestContext, args: &[String]) -> Result<RespValue, CommandError> {
    if !ctx.replication.is_primary() {
        return Err(CommandError::NotAPrimary);
    }

    let [requested_replid, requested_offset] = args else {
        return Err(CommandError::WrongNumberOfArguments("psync".to_string()));
    };

    if requested_replid != "?" && *requested_replid != ctx.replication.replid() {
        return Err(CommandError::InvalidPsync);
    }

    if requested_offset.parse::<i64>().is_err() {
        return Err(CommandError::InvalidPsync);
    }

    let snapshot = ctx.keyspace.dump().await;

    Ok(RespValue::FlatArray(vec![
        RespValue::SimpleString(format!("FULLRESYNC {} 0", ctx.replication.replid())),
        RespValue::BulkBytes(snapshot),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::test_context;

    fn args(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_psync_reply_framing() {
        let ctx = test_context().await;

        let reply = psync(&ctx, &args(&["?", "-1"])).await.unwrap();
        let encoded = reply.encode();
        let text = String::from_utf8_lossy(&encoded);

        let expected_prefix = format!("+FULLRESYNC {} 0\r\n$", ctx.replication.replid());
        assert!(text.starts_with(&expected_prefix), "got {:?}", text);
        // No CRLF after the snapshot payload.
        assert!(!encoded.ends_with(b"\r\n"));
    }

    #[tokio::test]
    async fn test_psync_argument_validation() {
        let ctx = test_context().await;

        assert_eq!(
            psync(&ctx, &args(&["?"])).await,
            Err(CommandError::WrongNumberOfArguments("psync".to_string()))
        );
        assert_eq!(
            psync(&ctx, &args(&["somereplid", "-1"])).await,
            Err(CommandError::InvalidPsync)
        );
        assert_eq!(
            psync(&ctx, &args(&["?", "soon"])).await,
            Err(CommandError::InvalidPsync)
        );
    }
}
