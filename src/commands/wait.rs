//! WAIT: count replicas that acknowledged the replication stream.

use std::time::Duration;

use crate::commands::{CommandError, RequestContext};
use crate::resp::RespValue;

struct WaitArguments {
    replicas_wanted: usize,
    timeout: Duration,
}

impl WaitArguments {
    fn parse(args: &[String]) -> Result<Self, CommandError> {
        let [replicas_wanted, timeout_ms] = args else {
            return Err(CommandError::WrongNumberOfArguments("wait".to_string()));
        };

        Ok(WaitArguments {
            replicas_wanted: replicas_wanted
                .parse::<usize>()
                .map_err(|_| CommandError::SyntaxError)?,
            timeout: Duration::from_millis(
                timeout_ms
                    .parse::<u64>()
                    .map_err(|_| CommandError::InvalidTimeout)?,
            ),
        })
    }
}

/// Handles `WAIT replicas_wanted timeout_ms`.
///
/// Asking for zero replicas answers immediately; an empty keyspace means
/// nothing was ever propagated, so every registered replica already
/// qualifies. Otherwise every replica is sent `REPLCONF GETACK *`, the
/// full timeout elapses, and the answer is how many acknowledged during
/// it.
pub async fn wait(ctx: &RequestContext, args: &[String]) -> Result<RespValue, CommandError> {
    let wait_arguments = WaitArguments::parse(args)?;

    if wait_arguments.replicas_wanted == 0 {
        return Ok(RespValue::Integer(0));
    }

    if ctx.keyspace.is_empty().await {
        let count = ctx.replication.replica_count().await;
        return Ok(RespValue::Integer(count as i64));
    }

    let acked = ctx.replication.wait_for_acks(wait_arguments.timeout).await;

    Ok(RespValue::Integer(acked as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::test_context;

    fn args(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_wait_for_zero_replicas() {
        let ctx = test_context().await;

        assert_eq!(
            wait(&ctx, &args(&["0", "100"])).await,
            Ok(RespValue::Integer(0))
        );
    }

    #[tokio::test]
    async fn test_wait_with_empty_keyspace_counts_replicas() {
        let ctx = test_context().await;

        // No replicas registered in a fresh context.
        assert_eq!(
            wait(&ctx, &args(&["3", "100"])).await,
            Ok(RespValue::Integer(0))
        );
    }

    #[tokio::test]
    async fn test_wait_with_writes_and_no_replicas_holds_the_full_timeout() {
        let ctx = test_context().await;

        ctx.keyspace.write("k", "v".to_string(), 0).await;

        let started = tokio::time::Instant::now();
        assert_eq!(
            wait(&ctx, &args(&["1", "100"])).await,
            Ok(RespValue::Integer(0))
        );
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_wait_argument_errors() {
        let ctx = test_context().await;

        assert!(wait(&ctx, &args(&["1"])).await.is_err());
        assert!(wait(&ctx, &args(&["x", "10"])).await.is_err());
        assert!(wait(&ctx, &args(&["1", "soon"])).await.is_err());
    }
}
