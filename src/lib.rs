//! A Redis-compatible in-memory data server.
//!
//! One process accepts concurrent client connections over TCP, speaks the
//! RESP line protocol, executes commands against a shared keyspace, and
//! participates in asynchronous primary/replica replication:
//!
//! - String operations with per-key expiry (GET, SET, DEL, INCR, KEYS, TYPE)
//! - Streams backed by a compressed radix trie (XADD, XRANGE, XREAD,
//!   including blocking reads)
//! - Transactions (MULTI, EXEC, DISCARD) with per-connection queues
//! - Replication: PSYNC full-resync, command propagation, offset
//!   accounting, and acknowledgement-based WAIT
//!
//! Concurrency is task-per-connection on Tokio; the keyspace sits behind a
//! readers-writer lock and replica fan-out runs through bounded queues.

pub mod commands;
pub mod config;
pub mod connection;
pub mod replication;
pub mod resp;
pub mod server;
pub mod snapshot;
pub mod store;
pub mod transactions;
