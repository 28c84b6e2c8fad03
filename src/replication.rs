//! The replication engine.
//!
//! A primary keeps a registry of replicas, each owning a bounded outbound
//! queue drained by a dedicated writer task, and a single-slot ack signal
//! fed by inbound `REPLCONF ACK` frames. A single broadcaster task fans
//! propagated command frames out to every queue with non-blocking sends.
//!
//! A replica opens one outbound connection to its primary, walks the
//! handshake (PING, REPLCONF ×2, PSYNC), ingests the full-resync snapshot,
//! and then counts every applied frame toward its offset.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use rand::distr::{Alphanumeric, SampleString};
use regex::Regex;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::resp::{RespError, RespValue};

/// Capacity of each replica's outbound queue.
const REPLICA_QUEUE_CAPACITY: usize = 100;
/// Capacity of the broadcaster's input channel.
const COMMANDS_CHANNEL_CAPACITY: usize = 100;

#[derive(Error, Debug)]
pub enum ReplicationError {
    #[error("failed to connect to primary: {0}")]
    Connect(String),
    #[error("connection closed during handshake")]
    ConnectionClosed,
    #[error("unexpected handshake response: {0}")]
    UnexpectedResponse(String),
    #[error("invalid replication id")]
    InvalidReplicationId,
    #[error("invalid snapshot framing")]
    SnapshotFraming,
    #[error(transparent)]
    Protocol(#[from] RespError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The role this process plays.
#[derive(Debug, Clone, PartialEq)]
pub enum Role {
    Primary,
    Replica { host: String, port: u16 },
}

impl Role {
    /// Redis wire terminology, as reported by INFO.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Primary => "master",
            Role::Replica { .. } => "slave",
        }
    }
}

/// A registered replica on the primary side.
///
/// The writer task owns the socket's write half exclusively; the registry
/// talks to it only through the bounded queue and the ack signal, which
/// breaks the reference cycle between the two.
#[derive(Debug, Clone)]
struct Replica {
    out_queue: mpsc::Sender<Vec<u8>>,
    ack_tx: mpsc::Sender<bool>,
    ack_rx: Arc<Mutex<mpsc::Receiver<bool>>>,
}

/// Shared replication state for either role.
#[derive(Debug)]
pub struct Replication {
    role: Role,
    /// Primary: generated at startup. Replica: learned during handshake.
    replid: std::sync::RwLock<String>,
    /// Primary: bytes produced for the replication stream. Replica: bytes
    /// of applied propagated frames.
    offset: AtomicI64,
    replicas: RwLock<HashMap<String, Replica>>,
    commands_tx: mpsc::Sender<Vec<u8>>,
}

impl Replication {
    /// Builds the replication state and hands back the receiving end of
    /// the commands channel for the broadcaster task.
    pub fn new(config: &Config) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (commands_tx, commands_rx) = mpsc::channel(COMMANDS_CHANNEL_CAPACITY);

        let (role, replid) = match &config.replicaof {
            Some((host, port)) => (
                Role::Replica {
                    host: host.clone(),
                    port: *port,
                },
                String::new(),
            ),
            None => (
                Role::Primary,
                Alphanumeric.sample_string(&mut rand::rng(), 40),
            ),
        };

        let replication = Replication {
            role,
            replid: std::sync::RwLock::new(replid),
            offset: AtomicI64::new(0),
            replicas: RwLock::new(HashMap::new()),
            commands_tx,
        };

        (replication, commands_rx)
    }

    pub fn is_primary(&self) -> bool {
        self.role == Role::Primary
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn replid(&self) -> String {
        self.replid.read().expect("replid lock poisoned").clone()
    }

    /// Records the primary's replication id learned from FULLRESYNC.
    pub fn set_primary_replid(&self, replid: String) {
        *self.replid.write().expect("replid lock poisoned") = replid;
    }

    pub fn offset(&self) -> i64 {
        self.offset.load(Ordering::SeqCst)
    }

    /// Advances the offset after a frame was successfully applied or
    /// produced.
    pub fn add_offset(&self, delta: i64) {
        self.offset.fetch_add(delta, Ordering::SeqCst);
    }

    /// The INFO replication section.
    pub fn info_section(&self) -> String {
        format!(
            "role:{}\r\nmaster_replid:{}\r\nmaster_repl_offset:{}\r\n",
            self.role.as_str(),
            self.replid(),
            self.offset()
        )
    }

    pub async fn replica_count(&self) -> usize {
        self.replicas.read().await.len()
    }

    /// Publishes a raw command frame for fan-out and accounts its bytes.
    pub async fn publish(&self, frame: Vec<u8>) {
        let frame_len = frame.len() as i64;

        if self.commands_tx.send(frame).await.is_err() {
            warn!("commands channel closed, dropping propagated frame");
            return;
        }

        self.add_offset(frame_len);
    }

    /// Registers a replica after PSYNC and spawns its writer task.
    ///
    /// The writer drains the queue in order; any write failure tears the
    /// replica down, closing its channels and the socket.
    pub async fn add_replica(self: &Arc<Self>, peer: String, writer: Arc<Mutex<OwnedWriteHalf>>) {
        let (out_queue, mut out_rx) = mpsc::channel::<Vec<u8>>(REPLICA_QUEUE_CAPACITY);
        let (ack_tx, ack_rx) = mpsc::channel::<bool>(1);

        let replica = Replica {
            out_queue,
            ack_tx,
            ack_rx: Arc::new(Mutex::new(ack_rx)),
        };

        self.replicas.write().await.insert(peer.clone(), replica);
        info!(peer = %peer, "replica registered");

        let replication = Arc::clone(self);

        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let mut writer_guard = writer.lock().await;

                let outcome = async {
                    writer_guard.write_all(&frame).await?;
                    writer_guard.flush().await
                }
                .await;

                if let Err(error) = outcome {
                    warn!(peer = %peer, %error, "replica write failed");
                    let _ = writer_guard.shutdown().await;
                    break;
                }
            }

            replication.remove_replica(&peer).await;
        });
    }

    pub async fn remove_replica(&self, peer: &str) {
        if self.replicas.write().await.remove(peer).is_some() {
            info!(peer = %peer, "replica removed");
        }
    }

    /// Routes an inbound `REPLCONF ACK` into the replica's single-slot
    /// signal; extra acks are dropped.
    pub async fn record_ack(&self, peer: &str) {
        let replicas = self.replicas.read().await;

        if let Some(replica) = replicas.get(peer) {
            let _ = replica.ack_tx.try_send(true);
        }
    }

    /// Sends `REPLCONF GETACK *` to every replica and counts the acks
    /// that arrive before the timeout.
    ///
    /// The full timeout always elapses before the count is reported, even
    /// when every replica acks early or none are registered.
    pub async fn wait_for_acks(&self, timeout: Duration) -> usize {
        let getack = RespValue::Array(vec![
            RespValue::BulkString("REPLCONF".to_string()),
            RespValue::BulkString("GETACK".to_string()),
            RespValue::BulkString("*".to_string()),
        ])
        .encode();

        let replicas: Vec<Replica> = self.replicas.read().await.values().cloned().collect();

        let deadline = tokio::time::Instant::now() + timeout;
        let mut pending = JoinSet::new();

        for replica in replicas {
            // Serialized with propagated commands through the same queue.
            if let Err(error) = replica.out_queue.try_send(getack.clone()) {
                debug!(%error, "failed to enqueue GETACK");
                continue;
            }

            let ack_rx = Arc::clone(&replica.ack_rx);

            pending.spawn(async move {
                let received = tokio::time::timeout_at(deadline, async {
                    ack_rx.lock().await.recv().await
                })
                .await;

                matches!(received, Ok(Some(true)))
            });
        }

        let mut acked = 0;
        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                result = pending.join_next(), if !pending.is_empty() => {
                    if matches!(result, Some(Ok(true))) {
                        acked += 1;
                    }
                }
                _ = &mut sleep => break,
            }
        }

        acked
    }

    /// Fans propagated frames out to every replica queue. Sends are
    /// non-blocking: a full queue drops the frame with a log line.
    pub async fn run_broadcaster(
        self: Arc<Self>,
        mut propagated: mpsc::Receiver<Vec<u8>>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                maybe_frame = propagated.recv() => {
                    let Some(frame) = maybe_frame else { break };
                    let replicas = self.replicas.read().await;

                    for (peer, replica) in replicas.iter() {
                        match replica.out_queue.try_send(frame.clone()) {
                            Ok(()) => (),
                            Err(mpsc::error::TrySendError::Full(_)) => {
                                warn!(peer = %peer, "replica queue full, dropping frame");
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => {
                                debug!(peer = %peer, "replica queue closed");
                            }
                        }
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
    }
}

/// What the replica-side handshake produced: the primary's replication id,
/// the full-resync snapshot, and any stream bytes that arrived after it.
pub struct HandshakeOutcome {
    pub primary_replid: String,
    pub snapshot: Vec<u8>,
    pub leftover: BytesMut,
}

/// Walks the replica-side handshake over an already-connected socket.
///
/// Sequence: `PING` → `+PONG`, `REPLCONF listening-port` → `+OK`,
/// `REPLCONF capa psync2` → `+OK`, `PSYNC ? -1` → `+FULLRESYNC <id> 0`
/// followed by the snapshot as `$<N>\r\n` plus exactly N bytes with no
/// trailing terminator.
pub async fn handshake(
    stream: &mut TcpStream,
    listening_port: u16,
) -> Result<HandshakeOutcome, ReplicationError> {
    let mut buffer = BytesMut::with_capacity(4096);

    let reply = exchange(stream, &mut buffer, &["PING"]).await?;
    expect_simple(&reply, "PONG")?;

    let reply = exchange(
        stream,
        &mut buffer,
        &["REPLCONF", "listening-port", &listening_port.to_string()],
    )
    .await?;
    expect_simple(&reply, "OK")?;

    let reply = exchange(stream, &mut buffer, &["REPLCONF", "capa", "psync2"]).await?;
    expect_simple(&reply, "OK")?;

    let reply = exchange(stream, &mut buffer, &["PSYNC", "?", "-1"]).await?;
    let primary_replid = parse_fullresync(&reply)?;

    let snapshot = read_snapshot(stream, &mut buffer).await?;

    info!(
        replid = %primary_replid,
        snapshot_bytes = snapshot.len(),
        "handshake complete"
    );

    Ok(HandshakeOutcome {
        primary_replid,
        snapshot,
        leftover: buffer,
    })
}

async fn exchange(
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
    parts: &[&str],
) -> Result<RespValue, ReplicationError> {
    let frame = RespValue::Array(
        parts
            .iter()
            .map(|part| RespValue::BulkString(part.to_string()))
            .collect(),
    );

    stream.write_all(&frame.encode()).await?;
    stream.flush().await?;

    read_frame(stream, buffer).await
}

async fn read_frame(
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
) -> Result<RespValue, ReplicationError> {
    loop {
        match RespValue::decode(buffer) {
            Ok((value, consumed)) => {
                buffer.advance(consumed);
                return Ok(value);
            }
            Err(RespError::Incomplete) => {
                if stream.read_buf(buffer).await? == 0 {
                    return Err(ReplicationError::ConnectionClosed);
                }
            }
            Err(error) => return Err(error.into()),
        }
    }
}

fn expect_simple(reply: &RespValue, expected: &str) -> Result<(), ReplicationError> {
    if *reply != RespValue::SimpleString(expected.to_string()) {
        return Err(ReplicationError::UnexpectedResponse(format!("{:?}", reply)));
    }

    Ok(())
}

fn parse_fullresync(reply: &RespValue) -> Result<String, ReplicationError> {
    let RespValue::SimpleString(line) = reply else {
        return Err(ReplicationError::UnexpectedResponse(format!("{:?}", reply)));
    };

    let parts: Vec<&str> = line.split_whitespace().collect();

    let ["FULLRESYNC", replid, _offset] = parts.as_slice() else {
        return Err(ReplicationError::UnexpectedResponse(line.clone()));
    };

    if !is_valid_replid(replid) {
        return Err(ReplicationError::InvalidReplicationId);
    }

    Ok(replid.to_string())
}

fn is_valid_replid(replid: &str) -> bool {
    let pattern = Regex::new(r"^[a-zA-Z0-9]{40}$").expect("valid replid pattern");
    pattern.is_match(replid)
}

/// Reads the snapshot payload: a bulk length header followed by exactly
/// that many raw bytes, with no trailing CRLF.
async fn read_snapshot(
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
) -> Result<Vec<u8>, ReplicationError> {
    let (length, header_len) = loop {
        if let Some(first) = buffer.first() {
            if *first != b'$' {
                return Err(ReplicationError::SnapshotFraming);
            }
        }

        if let Some(terminator) = buffer
            .windows(2)
            .position(|window| window == b"\r\n")
        {
            let header = std::str::from_utf8(&buffer[1..terminator])
                .map_err(|_| ReplicationError::SnapshotFraming)?;
            let length = header
                .parse::<usize>()
                .map_err(|_| ReplicationError::SnapshotFraming)?;

            break (length, terminator + 2);
        }

        if stream.read_buf(buffer).await? == 0 {
            return Err(ReplicationError::ConnectionClosed);
        }
    };

    while buffer.len() < header_len + length {
        if stream.read_buf(buffer).await? == 0 {
            return Err(ReplicationError::ConnectionClosed);
        }
    }

    buffer.advance(header_len);
    let snapshot = buffer.split_to(length);

    Ok(snapshot.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn primary_config() -> Config {
        Config::new(vec!["emberdb".to_string()]).unwrap()
    }

    fn replica_config() -> Config {
        Config::new(
            ["emberdb", "--replicaof", "127.0.0.1 6379"]
                .iter()
                .map(|s| s.to_string()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_primary_state() {
        let (replication, _rx) = Replication::new(&primary_config());

        assert!(replication.is_primary());
        assert_eq!(replication.replid().len(), 40);
        assert!(is_valid_replid(&replication.replid()));
        assert_eq!(replication.offset(), 0);
        assert_eq!(replication.replica_count().await, 0);
    }

    #[tokio::test]
    async fn test_replica_state() {
        let (replication, _rx) = Replication::new(&replica_config());

        assert!(!replication.is_primary());
        assert_eq!(replication.replid(), "");

        replication.set_primary_replid("a".repeat(40));
        assert_eq!(replication.replid(), "a".repeat(40));
    }

    #[tokio::test]
    async fn test_info_section_format() {
        let (replication, _rx) = Replication::new(&primary_config());
        replication.add_offset(12);

        let section = replication.info_section();

        assert!(section.starts_with("role:master\r\n"));
        assert!(section.contains(&format!("master_replid:{}\r\n", replication.replid())));
        assert!(section.ends_with("master_repl_offset:12\r\n"));
    }

    #[tokio::test]
    async fn test_offset_accumulates() {
        let (replication, _rx) = Replication::new(&primary_config());

        replication.add_offset(10);
        replication.add_offset(5);
        assert_eq!(replication.offset(), 15);
    }

    #[tokio::test]
    async fn test_publish_counts_bytes() {
        let (replication, mut rx) = Replication::new(&primary_config());

        replication.publish(b"*1\r\n$4\r\nPING\r\n".to_vec()).await;

        assert_eq!(replication.offset(), 14);
        assert_eq!(rx.recv().await.unwrap(), b"*1\r\n$4\r\nPING\r\n".to_vec());
    }

    #[tokio::test]
    async fn test_record_ack_without_replicas_is_a_noop() {
        let (replication, _rx) = Replication::new(&primary_config());
        replication.record_ack("nobody:1").await;
    }

    #[tokio::test]
    async fn test_fullresync_parsing() {
        let valid_id = "a".repeat(40);

        let test_cases = vec![
            (
                RespValue::SimpleString(format!("FULLRESYNC {} 0", valid_id)),
                Some(valid_id.clone()),
            ),
            (
                RespValue::SimpleString("FULLRESYNC short 0".to_string()),
                None,
            ),
            (RespValue::SimpleString("RESYNC x 0".to_string()), None),
            (RespValue::SimpleString("FULLRESYNC".to_string()), None),
            (RespValue::Integer(1), None),
        ];

        for (reply, expected) in test_cases {
            let result = parse_fullresync(&reply);
            match expected {
                Some(replid) => assert_eq!(result.unwrap(), replid),
                None => assert!(result.is_err(), "reply {:?}", reply),
            }
        }
    }

    #[tokio::test]
    async fn test_replica_write_path_and_acks() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = TcpStream::connect(addr).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();

        let (_, write_half) = server_side.into_split();
        let writer = Arc::new(Mutex::new(write_half));

        let (replication, commands_rx) = Replication::new(&primary_config());
        let replication = Arc::new(replication);

        let (shutdown_tx, _) = broadcast::channel(1);
        tokio::spawn(
            Arc::clone(&replication).run_broadcaster(commands_rx, shutdown_tx.subscribe()),
        );

        replication
            .add_replica("peer:1".to_string(), writer)
            .await;
        assert_eq!(replication.replica_count().await, 1);

        // A propagated frame reaches the replica socket through the queue.
        replication.publish(b"*1\r\n$4\r\nPING\r\n".to_vec()).await;

        let mut reader = tokio::io::BufReader::new(client);
        let mut received = vec![0u8; 14];
        reader.read_exact(&mut received).await.unwrap();
        assert_eq!(received, b"*1\r\n$4\r\nPING\r\n".to_vec());

        // WAIT sends GETACK through the same queue and counts the ack.
        let started = tokio::time::Instant::now();
        let replication_for_wait = Arc::clone(&replication);
        let waiter = tokio::spawn(async move {
            replication_for_wait
                .wait_for_acks(Duration::from_millis(300))
                .await
        });

        let mut getack = vec![0u8; 37];
        reader.read_exact(&mut getack).await.unwrap();
        assert_eq!(
            getack,
            b"*3\r\n$8\r\nREPLCONF\r\n$6\r\nGETACK\r\n$1\r\n*\r\n".to_vec()
        );

        replication.record_ack("peer:1").await;
        assert_eq!(waiter.await.unwrap(), 1);

        // An early ack does not shorten the wait.
        assert!(started.elapsed() >= Duration::from_millis(300));

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_wait_for_acks_without_replicas_holds_the_timeout() {
        let (replication, _rx) = Replication::new(&primary_config());

        let started = tokio::time::Instant::now();
        assert_eq!(
            replication.wait_for_acks(Duration::from_millis(100)).await,
            0
        );
        assert!(started.elapsed() >= Duration::from_millis(100));
    }
}
