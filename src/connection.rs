//! Per-connection pipelines.
//!
//! Every accepted socket gets one task that owns a growable receive
//! buffer: read bytes, decode as many complete frames as available,
//! execute, write replies. Partial frames stay buffered for the next
//! read. Two special modes exist: a client connection that completes
//! PSYNC is handed to the replication engine and only its inbound ACKs
//! are processed afterwards, and a replica's link to its primary applies
//! the propagated stream with responses suppressed.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use crate::commands::{self, Command, CommandError, RequestContext};
use crate::resp::{RespError, RespValue};

/// Consecutive undecodable frames tolerated before the connection is
/// considered unsynchronizable and closed.
const MAX_PROTOCOL_ERRORS: u32 = 3;

/// Verbs a replica refuses from regular clients.
const WRITE_VERBS: [&str; 4] = ["SET", "DEL", "INCR", "XADD"];

/// Drives one client connection until EOF, shutdown, or handoff to the
/// replication engine.
pub async fn handle_client_connection(
    stream: TcpStream,
    ctx: RequestContext,
    mut shutdown: broadcast::Receiver<()>,
) {
    let peer = ctx.conn_id.clone();
    let (mut reader, write_half) = stream.into_split();
    let writer = Arc::new(Mutex::new(write_half));
    let mut buffer = BytesMut::with_capacity(4096);
    let mut protocol_errors = 0u32;

    debug!(peer = %peer, "client connected");

    'connection: loop {
        loop {
            let (frame, consumed) = match RespValue::decode(&buffer) {
                Ok(decoded) => decoded,
                Err(RespError::Incomplete) => break,
                Err(error) => {
                    protocol_errors += 1;
                    warn!(peer = %peer, %error, "dropping undecodable frame");

                    let _ = write_to_stream(&writer, error.as_string().as_bytes()).await;
                    buffer.clear();

                    if protocol_errors >= MAX_PROTOCOL_ERRORS {
                        break 'connection;
                    }

                    break;
                }
            };

            protocol_errors = 0;
            let raw = buffer.split_to(consumed);

            let command = match Command::from_frame(&frame, &raw) {
                Ok(command) => command,
                Err(error) => {
                    let _ = write_to_stream(&writer, &error.as_value().encode()).await;
                    continue;
                }
            };

            let verb = command.name.clone();
            let should_propagate = command.propagate;

            if !ctx.replication.is_primary() && WRITE_VERBS.contains(&verb.as_str()) {
                let error = CommandError::ReplicaReadOnly;
                let _ = write_to_stream(&writer, &error.as_value().encode()).await;
                continue;
            }

            let outcome = commands::dispatch(command, &ctx).await;
            let encoded = outcome.response.encode();

            if !encoded.is_empty() && write_to_stream(&writer, &encoded).await.is_err() {
                break 'connection;
            }

            if verb == "PSYNC" && outcome.executed {
                // The socket now belongs to the replication engine for
                // outbound writing; inbound bytes only carry ACKs.
                ctx.replication
                    .add_replica(peer.clone(), Arc::clone(&writer))
                    .await;
                drive_replica_acks(&mut reader, std::mem::take(&mut buffer), &ctx).await;
                break 'connection;
            }

            if should_propagate && outcome.executed && ctx.replication.is_primary() {
                ctx.replication.publish(raw.to_vec()).await;
            }
        }

        tokio::select! {
            read = reader.read_buf(&mut buffer) => {
                match read {
                    Ok(0) => break 'connection,
                    Ok(_) => (),
                    Err(error) => {
                        debug!(peer = %peer, %error, "read failed");
                        break 'connection;
                    }
                }
            }
            _ = shutdown.recv() => break 'connection,
        }
    }

    ctx.transactions.remove_connection(&peer).await;
    debug!(peer = %peer, "client disconnected");
}

/// Post-PSYNC mode on the primary: keep reading the replica's socket and
/// route `REPLCONF ACK` frames into its ack signal. EOF or a read error
/// removes the replica.
async fn drive_replica_acks(
    reader: &mut OwnedReadHalf,
    mut buffer: BytesMut,
    ctx: &RequestContext,
) {
    let peer = ctx.conn_id.clone();

    loop {
        loop {
            let (frame, consumed) = match RespValue::decode(&buffer) {
                Ok(decoded) => decoded,
                Err(RespError::Incomplete) => break,
                Err(_) => {
                    buffer.clear();
                    break;
                }
            };

            let _ = buffer.split_to(consumed);

            if is_ack_frame(&frame) {
                ctx.replication.record_ack(&peer).await;
            }
        }

        match reader.read_buf(&mut buffer).await {
            Ok(0) | Err(_) => break,
            Ok(_) => (),
        }
    }

    ctx.replication.remove_replica(&peer).await;
}

fn is_ack_frame(frame: &RespValue) -> bool {
    let RespValue::Array(elements) = frame else {
        return false;
    };

    let mut parts = elements.iter().filter_map(|element| element.as_string());

    parts.next().is_some_and(|verb| verb.eq_ignore_ascii_case("REPLCONF"))
        && parts.next().is_some_and(|sub| sub.eq_ignore_ascii_case("ACK"))
}

/// The replica side of the replication link, entered after the handshake.
///
/// Every fully applied frame advances the offset by its wire length.
/// Responses are suppressed: only REPLCONF answers (the GETACK reply)
/// travel back to the primary.
pub async fn handle_primary_link(
    stream: TcpStream,
    leftover: BytesMut,
    ctx: RequestContext,
    mut shutdown: broadcast::Receiver<()>,
) {
    let (mut reader, write_half) = stream.into_split();
    let writer = Arc::new(Mutex::new(write_half));
    let mut buffer = leftover;

    'link: loop {
        loop {
            let (frame, consumed) = match RespValue::decode(&buffer) {
                Ok(decoded) => decoded,
                Err(RespError::Incomplete) => break,
                Err(error) => {
                    warn!(%error, "undecodable frame on replication link");
                    buffer.clear();
                    break;
                }
            };

            let raw = buffer.split_to(consumed);

            let Ok(command) = Command::from_frame(&frame, &raw) else {
                continue;
            };

            let verb = command.name.clone();

            let reply = match commands::execute(&command, &ctx).await {
                Ok(reply) => reply,
                Err(error) => {
                    debug!(%error, verb = %verb, "propagated command failed");
                    continue;
                }
            };

            if verb == "REPLCONF" {
                let encoded = reply.encode();

                if !encoded.is_empty() && write_to_stream(&writer, &encoded).await.is_err() {
                    break 'link;
                }
            }

            ctx.replication.add_offset(raw.len() as i64);
        }

        tokio::select! {
            read = reader.read_buf(&mut buffer) => {
                match read {
                    Ok(0) => break 'link,
                    Ok(_) => (),
                    Err(error) => {
                        warn!(%error, "replication link read failed");
                        break 'link;
                    }
                }
            }
            _ = shutdown.recv() => break 'link,
        }
    }

    debug!("replication link closed");
}

pub(crate) async fn write_to_stream(
    writer: &Arc<Mutex<OwnedWriteHalf>>,
    bytes: &[u8],
) -> tokio::io::Result<()> {
    let mut writer_guard = writer.lock().await;
    writer_guard.write_all(bytes).await?;
    writer_guard.flush().await
}
