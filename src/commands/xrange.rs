use crate::commands::stream_format::entries_to_resp;
use crate::commands::{CommandError, RequestContext};
use crate::resp::RespValue;

/// Handles XRANGE: entries within the inclusive `[start, end]` interval,
/// ascending by id. `-` and `+` are open endpoints.
pub async fn xrange(ctx: &RequestContext, args: &[String]) -> Result<RespValue, CommandError> {
    let [key, start, end] = args else {
        return Err(CommandError::WrongNumberOfArguments("xrange".to_string()));
    };

    let entries = ctx.keyspace.xrange(key, start, end).await?;

    Ok(entries_to_resp(&entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::test_context;

    fn args(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    async fn seeded_context() -> crate::commands::RequestContext {
        let ctx = test_context().await;

        for (id, value) in [("1-1", "a"), ("1-2", "b"), ("2-0", "c")] {
            ctx.keyspace
                .xadd("s", id, vec![("v".to_string(), value.to_string())])
                .await
                .unwrap();
        }

        ctx
    }

    #[tokio::test]
    async fn test_xrange_full_interval() {
        let ctx = seeded_context().await;

        let RespValue::Array(entries) = xrange(&ctx, &args(&["s", "-", "+"])).await.unwrap()
        else {
            panic!("expected an array");
        };

        assert_eq!(entries.len(), 3);
    }

    #[tokio::test]
    async fn test_xrange_sub_interval() {
        let ctx = seeded_context().await;

        let RespValue::Array(entries) =
            xrange(&ctx, &args(&["s", "1-2", "2-0"])).await.unwrap()
        else {
            panic!("expected an array");
        };

        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn test_xrange_missing_stream_is_empty() {
        let ctx = test_context().await;

        assert_eq!(
            xrange(&ctx, &args(&["nope", "-", "+"])).await,
            Ok(RespValue::Array(vec![]))
        );
    }

    #[tokio::test]
    async fn test_xrange_arity() {
        let ctx = test_context().await;
        assert!(xrange(&ctx, &args(&["s", "-"])).await.is_err());
    }
}
