use std::time::Duration;

use tokio::sync::mpsc;

use crate::commands::stream_format::entries_to_resp;
use crate::commands::{CommandError, RequestContext};
use crate::resp::RespValue;

/// Parsed arguments for XREAD:
/// `XREAD [BLOCK ms] STREAMS key [key …] id [id …]`.
struct XreadArguments {
    /// `None` reads immediately, `Some(0)` blocks until data arrives,
    /// `Some(n)` sleeps n milliseconds before reading.
    block_ms: Option<u64>,
    keys: Vec<String>,
    ids: Vec<String>,
}

impl XreadArguments {
    fn parse(args: &[String]) -> Result<Self, CommandError> {
        let mut cursor = 0;
        let mut block_ms = None;

        if args
            .first()
            .is_some_and(|arg| arg.eq_ignore_ascii_case("block"))
        {
            let duration = args.get(1).ok_or(CommandError::SyntaxError)?;
            block_ms = Some(
                duration
                    .parse::<u64>()
                    .map_err(|_| CommandError::InvalidTimeout)?,
            );
            cursor = 2;
        }

        if !args
            .get(cursor)
            .is_some_and(|arg| arg.eq_ignore_ascii_case("streams"))
        {
            return Err(CommandError::SyntaxError);
        }

        let names = &args[cursor + 1..];

        if names.is_empty() || names.len() % 2 != 0 {
            return Err(CommandError::WrongNumberOfArguments("xread".to_string()));
        }

        let (keys, ids) = names.split_at(names.len() / 2);

        Ok(XreadArguments {
            block_ms,
            keys: keys.to_vec(),
            ids: ids.to_vec(),
        })
    }
}

/// Handles XREAD.
///
/// Ids are exclusive: only entries strictly greater are returned. An id of
/// `$` resolves to the stream's current tail before any waiting happens,
/// so only entries added afterwards are observed.
pub async fn xread(ctx: &RequestContext, args: &[String]) -> Result<RespValue, CommandError> {
    let mut xread_arguments = XreadArguments::parse(args)?;

    for (key, id) in xread_arguments
        .keys
        .iter()
        .zip(xread_arguments.ids.iter_mut())
    {
        if id == "$" {
            *id = ctx
                .keyspace
                .stream_tail(key)
                .await
                .unwrap_or_else(|| "0-0".to_string());
        }
    }

    match xread_arguments.block_ms {
        None => read_streams(ctx, &xread_arguments.keys, &xread_arguments.ids).await,
        Some(0) => blocking_read(ctx, &xread_arguments.keys, &xread_arguments.ids).await,
        Some(millis) => {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            read_streams(ctx, &xread_arguments.keys, &xread_arguments.ids).await
        }
    }
}

/// Registers a wakeup sink on every named stream, waits for the first
/// notification, then reads.
///
/// Entries are re-checked right after subscribing: an add racing between
/// the id resolution and the subscription must not leave the caller
/// waiting on data that is already there. Nothing to subscribe to means
/// nothing can ever wake us, so the wait is skipped.
async fn blocking_read(
    ctx: &RequestContext,
    keys: &[String],
    ids: &[String],
) -> Result<RespValue, CommandError> {
    let (sink, mut wakeups) = mpsc::channel(keys.len().max(1));
    let mut subscribed = Vec::with_capacity(keys.len());

    for key in keys {
        if ctx.keyspace.subscribe(key, sink.clone()).await {
            subscribed.push(key.clone());
        }
    }

    let mut reply = read_streams(ctx, keys, ids).await;

    if matches!(reply, Ok(RespValue::NullBulkString)) && !subscribed.is_empty() {
        let _ = wakeups.recv().await;
        reply = read_streams(ctx, keys, ids).await;
    }

    for key in &subscribed {
        ctx.keyspace.unsubscribe(key, &sink).await;
    }

    reply
}

/// Collects the per-stream reply arrays; streams with no new entries are
/// omitted, and no data at all answers with the null bulk string.
async fn read_streams(
    ctx: &RequestContext,
    keys: &[String],
    ids: &[String],
) -> Result<RespValue, CommandError> {
    let mut per_stream = Vec::with_capacity(keys.len());

    for (key, id) in keys.iter().zip(ids.iter()) {
        let entries = ctx.keyspace.xread(key, id).await?;

        if !entries.is_empty() {
            per_stream.push(RespValue::Array(vec![
                RespValue::BulkString(key.clone()),
                entries_to_resp(&entries),
            ]));
        }
    }

    if per_stream.is_empty() {
        return Ok(RespValue::NullBulkString);
    }

    Ok(RespValue::Array(per_stream))
}
