//! The in-memory keyspace: a shared map of name → typed record.
//!
//! A single readers-writer lock guards the map. Readers detect expired
//! records and re-lock for writing to reap them; there is no background
//! sweeper. Writers hold the lock briefly and never across I/O.

mod record;
pub mod stream;

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::sync::{mpsc, RwLock};

pub use record::{Record, StringRecord};
pub use stream::{Entry, Stream, StreamError, StreamId};

use crate::snapshot::{SnapshotError, SnapshotReader};

#[derive(Error, Debug, PartialEq)]
pub enum StoreError {
    #[error("value is not an integer or out of range")]
    NotAnInteger,
    #[error("Operation against a key holding the wrong kind of value")]
    WrongType,
    #[error(transparent)]
    Stream(#[from] StreamError),
}

/// Milliseconds since the Unix epoch.
pub fn now_unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

/// The shared keyspace.
#[derive(Debug, Default)]
pub struct Keyspace {
    entries: RwLock<HashMap<String, Record>>,
}

impl Keyspace {
    pub fn new() -> Self {
        Keyspace {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Reads a record, reaping it when expired.
    ///
    /// An expired record is removed under the write lock and reported as
    /// absent.
    pub async fn read(&self, name: &str) -> Option<Record> {
        {
            let entries = self.entries.read().await;
            let record = entries.get(name)?;

            if !record.is_expired(now_unix_ms()) {
                return Some(record.clone());
            }
        }

        let mut entries = self.entries.write().await;

        // The record may have been rewritten between the two locks.
        if let Some(record) = entries.get(name) {
            if record.is_expired(now_unix_ms()) {
                entries.remove(name);
            } else {
                return Some(record.clone());
            }
        }

        None
    }

    /// Stores a string record. `expires_at_unix_ms == 0` means no TTL.
    pub async fn write(&self, name: &str, value: String, expires_at_unix_ms: i64) {
        let mut entries = self.entries.write().await;
        entries.insert(name.to_string(), Record::string(value, expires_at_unix_ms));
    }

    /// Removes the named entries, returning how many live entries were
    /// actually removed.
    pub async fn remove(&self, names: &[String]) -> usize {
        let mut entries = self.entries.write().await;
        let now = now_unix_ms();
        let mut removed = 0;

        for name in names {
            if let Some(record) = entries.remove(name) {
                if !record.is_expired(now) {
                    removed += 1;
                }
            }
        }

        removed
    }

    /// Names of all live entries.
    pub async fn keys(&self) -> Vec<String> {
        let entries = self.entries.read().await;
        let now = now_unix_ms();

        entries
            .iter()
            .filter(|(_, record)| !record.is_expired(now))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let entries = self.entries.read().await;
        let now = now_unix_ms();

        entries
            .values()
            .filter(|record| !record.is_expired(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Atomically increments an integer-valued string record.
    ///
    /// A missing or expired record is initialized to 1 with no TTL.
    pub async fn increment(&self, name: &str) -> Result<i64, StoreError> {
        let mut entries = self.entries.write().await;
        let now = now_unix_ms();

        let live = entries
            .get_mut(name)
            .filter(|record| !record.is_expired(now));

        let Some(record) = live else {
            entries.insert(name.to_string(), Record::string("1".to_string(), 0));
            return Ok(1);
        };

        let Record::String(string_record) = record else {
            return Err(StoreError::WrongType);
        };

        let current = string_record
            .value
            .parse::<i64>()
            .map_err(|_| StoreError::NotAnInteger)?;

        let incremented = current + 1;
        string_record.value = incremented.to_string();

        Ok(incremented)
    }

    /// Appends an entry to the named stream, creating the stream when the
    /// name is unbound. Returns the resolved entry id.
    pub async fn xadd(
        &self,
        name: &str,
        id_spec: &str,
        fields: Vec<(String, String)>,
    ) -> Result<String, StoreError> {
        let mut entries = self.entries.write().await;

        match entries.get_mut(name) {
            Some(Record::Stream(stream)) => Ok(stream.add(id_spec, fields)?),
            Some(_) => Err(StoreError::WrongType),
            None => {
                let mut stream = Stream::new();
                let id = stream.add(id_spec, fields)?;
                entries.insert(name.to_string(), Record::Stream(stream));
                Ok(id)
            }
        }
    }

    /// Entries of the named stream within the inclusive interval. A
    /// missing stream yields no entries.
    pub async fn xrange(
        &self,
        name: &str,
        start: &str,
        end: &str,
    ) -> Result<Vec<Entry>, StoreError> {
        let entries = self.entries.read().await;

        match entries.get(name) {
            Some(Record::Stream(stream)) => Ok(stream.range(start, end)?),
            Some(_) => Err(StoreError::WrongType),
            None => Ok(Vec::new()),
        }
    }

    /// Entries of the named stream strictly after `after_id`.
    pub async fn xread(&self, name: &str, after_id: &str) -> Result<Vec<Entry>, StoreError> {
        let entries = self.entries.read().await;

        match entries.get(name) {
            Some(Record::Stream(stream)) => Ok(stream.read_from(after_id)?),
            Some(_) => Err(StoreError::WrongType),
            None => Ok(Vec::new()),
        }
    }

    /// The tail id of the named stream, if it is one.
    pub async fn stream_tail(&self, name: &str) -> Option<String> {
        let entries = self.entries.read().await;
        entries.get(name)?.as_stream().map(Stream::tail)
    }

    /// Registers a wakeup sink on the named stream. Returns false when the
    /// name is unbound or not a stream.
    pub async fn subscribe(&self, name: &str, sink: mpsc::Sender<()>) -> bool {
        let mut entries = self.entries.write().await;

        match entries.get_mut(name) {
            Some(Record::Stream(stream)) => {
                stream.subscribe(sink);
                true
            }
            _ => false,
        }
    }

    pub async fn unsubscribe(&self, name: &str, sink: &mpsc::Sender<()>) {
        let mut entries = self.entries.write().await;

        if let Some(Record::Stream(stream)) = entries.get_mut(name) {
            stream.unsubscribe(sink);
        }
    }

    /// Serializes the keyspace into an opaque snapshot blob.
    pub async fn dump(&self) -> Vec<u8> {
        crate::snapshot::dump()
    }

    /// Populates the keyspace from a snapshot reader.
    ///
    /// Entries are applied as they are decoded; a parse error aborts
    /// hydration but leaves already-applied entries in place.
    pub async fn hydrate(&self, mut reader: SnapshotReader) -> Result<(), SnapshotError> {
        let mut entries = self.entries.write().await;

        while let Some(snapshot_entry) = reader.next_entry()? {
            entries.insert(
                snapshot_entry.key,
                Record::string(snapshot_entry.value, snapshot_entry.expires_at_unix_ms),
            );
        }

        Ok(())
    }
}
