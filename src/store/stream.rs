//! Stream records backed by a compressed radix trie.
//!
//! Entry ids are `<ms>-<seq>` pairs stored under their textual form. The
//! trie compresses shared prefixes: every node carries a prefix fragment,
//! the entries whose full id ends exactly at that node, and children keyed
//! by the first byte after the fragment. Ordering and validation are
//! numeric over `(ms, seq)`; the textual trie layout is only a storage
//! detail.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug, PartialEq)]
pub enum StreamError {
    #[error("The ID specified in XADD must be greater than 0-0")]
    IdIsZero,
    #[error("The ID specified in XADD is equal or smaller than the target stream top item")]
    IdNotGreaterThanTail,
    #[error("Invalid stream ID specified as a stream command argument")]
    InvalidId,
}

/// A parsed `<ms>-<seq>` entry id. Comparison is numeric, never
/// lexicographic: `9-1` sorts before `10-0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    pub const ZERO: StreamId = StreamId { ms: 0, seq: 0 };

    pub fn parse(id: &str) -> Result<Self, StreamError> {
        let (ms, seq) = id.split_once('-').ok_or(StreamError::InvalidId)?;

        Ok(StreamId {
            ms: ms.parse::<u64>().map_err(|_| StreamError::InvalidId)?,
            seq: seq.parse::<u64>().map_err(|_| StreamError::InvalidId)?,
        })
    }

    /// Parses a range bound: a bare `<ms>` defaults the sequence to 0 at
    /// the start of an interval and to the maximum at its end.
    pub fn parse_bound(id: &str, is_end: bool) -> Result<Self, StreamError> {
        if id.contains('-') {
            return Self::parse(id);
        }

        let ms = id.parse::<u64>().map_err(|_| StreamError::InvalidId)?;

        Ok(StreamId {
            ms,
            seq: if is_end { u64::MAX } else { 0 },
        })
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

/// One stream entry: an id plus its field/value pairs in insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub id: String,
    pub fields: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
struct Node {
    prefix: String,
    entries: Vec<Entry>,
    children: BTreeMap<u8, Box<Node>>,
}

impl Node {
    fn leaf(prefix: &str, entry: Entry) -> Self {
        Node {
            prefix: prefix.to_string(),
            entries: vec![entry],
            children: BTreeMap::new(),
        }
    }
}

/// An append-only stream of entries.
#[derive(Debug, Clone)]
pub struct Stream {
    root: Option<Box<Node>>,
    /// Largest id present, `0-0` while empty.
    tail: StreamId,
    length: u64,
    subscribers: Vec<mpsc::Sender<()>>,
}

impl Stream {
    pub fn new() -> Self {
        Stream {
            root: None,
            tail: StreamId::ZERO,
            length: 0,
            subscribers: Vec::new(),
        }
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The largest id present, rendered as `<ms>-<seq>`.
    pub fn tail(&self) -> String {
        self.tail.to_string()
    }

    /// Adds an entry, resolving the id spec first.
    ///
    /// * `*` resolves to `<now_ms>-0`
    /// * `<ms>-*` resolves to `<ms>-<tail_seq + 1>` when the tail shares
    ///   `ms`, otherwise `<ms>-0` (`0-*` starts at `0-1`)
    /// * anything else is taken literally
    ///
    /// The resolved id must be strictly greater than both `0-0` and the
    /// current tail under `(ms, seq)` ordering. On success every
    /// subscriber sink is notified.
    pub fn add(
        &mut self,
        id_spec: &str,
        fields: Vec<(String, String)>,
    ) -> Result<String, StreamError> {
        let id = if id_spec.contains('*') {
            self.resolve_id_spec(id_spec)?
        } else {
            StreamId::parse(id_spec)?
        };

        if id == StreamId::ZERO {
            return Err(StreamError::IdIsZero);
        }

        if id <= self.tail {
            return Err(StreamError::IdNotGreaterThanTail);
        }

        let rendered = id.to_string();
        let entry = Entry {
            id: rendered.clone(),
            fields,
        };

        match self.root.as_mut() {
            None => {
                self.root = Some(Box::new(Node::leaf(&rendered, entry)));
            }
            Some(root) => {
                insert_suffix(root, &rendered, entry);
            }
        }

        self.tail = id;
        self.length += 1;
        self.notify();

        Ok(rendered)
    }

    fn resolve_id_spec(&self, id_spec: &str) -> Result<StreamId, StreamError> {
        if id_spec == "*" {
            return Ok(StreamId {
                ms: now_unix_ms(),
                seq: 0,
            });
        }

        let (ms_part, seq_part) = id_spec.split_once('-').ok_or(StreamError::InvalidId)?;

        if seq_part != "*" {
            return Err(StreamError::InvalidId);
        }

        let ms = ms_part.parse::<u64>().map_err(|_| StreamError::InvalidId)?;

        let seq = if ms == self.tail.ms {
            self.tail.seq + 1
        } else if ms == 0 {
            1
        } else {
            0
        };

        Ok(StreamId { ms, seq })
    }

    /// Looks up an entry by its exact id.
    pub fn get(&self, id: &str) -> Option<&Entry> {
        let mut node = self.root.as_deref()?;
        let mut suffix = id;

        loop {
            suffix = suffix.strip_prefix(node.prefix.as_str())?;

            if suffix.is_empty() {
                return node.entries.iter().find(|entry| entry.id == id);
            }

            node = node.children.get(&suffix.as_bytes()[0])?;
        }
    }

    /// Entries whose id lies in the inclusive `[start, end]` interval.
    ///
    /// `-` expands to the smallest possible id and `+` to the current
    /// tail. The result is ascending by `(ms, seq)`.
    pub fn range(&self, start: &str, end: &str) -> Result<Vec<Entry>, StreamError> {
        let low = match start {
            "-" => StreamId::ZERO,
            other => StreamId::parse_bound(other, false)?,
        };
        let high = match end {
            "+" => self.tail,
            other => StreamId::parse_bound(other, true)?,
        };

        Ok(self.collect_between(low, high, true))
    }

    /// Entries strictly greater than `after_id`.
    pub fn read_from(&self, after_id: &str) -> Result<Vec<Entry>, StreamError> {
        let after = StreamId::parse_bound(after_id, false)?;
        Ok(self.collect_between(after, self.tail, false))
    }

    fn collect_between(&self, low: StreamId, high: StreamId, inclusive_low: bool) -> Vec<Entry> {
        let mut result = Vec::new();

        let Some(root) = self.root.as_deref() else {
            return result;
        };

        let mut stack = vec![root];

        while let Some(node) = stack.pop() {
            for entry in &node.entries {
                // Ids in the trie were validated on insert.
                let Ok(id) = StreamId::parse(&entry.id) else {
                    continue;
                };

                let above_low = if inclusive_low { id >= low } else { id > low };

                if above_low && id <= high {
                    result.push(entry.clone());
                }
            }

            for child in node.children.values() {
                stack.push(child);
            }
        }

        result.sort_by_key(|entry| StreamId::parse(&entry.id).unwrap_or(StreamId::ZERO));
        result
    }

    /// Registers a notification sink woken on every successful add.
    pub fn subscribe(&mut self, sink: mpsc::Sender<()>) {
        self.subscribers.push(sink);
    }

    pub fn unsubscribe(&mut self, sink: &mpsc::Sender<()>) {
        self.subscribers
            .retain(|subscriber| !subscriber.same_channel(sink));
    }

    fn notify(&mut self) {
        // Non-blocking: a full sink already has a wakeup pending.
        self.subscribers
            .retain(|subscriber| !matches!(
                subscriber.try_send(()),
                Err(mpsc::error::TrySendError::Closed(_))
            ));
    }
}

impl Default for Stream {
    fn default() -> Self {
        Self::new()
    }
}

/// Inserts `entry` below `node`, whose accumulated prefix already covers
/// everything before `suffix`. Splits the node when it only partially
/// matches.
fn insert_suffix(node: &mut Node, suffix: &str, entry: Entry) {
    let lcp = longest_common_prefix(suffix, &node.prefix);

    if lcp < node.prefix.len() {
        // Partial match: push the node's contents into a child keyed by
        // the unmatched remainder, then attach the new entry next to it.
        let split_child = Node {
            prefix: node.prefix[lcp..].to_string(),
            entries: std::mem::take(&mut node.entries),
            children: std::mem::take(&mut node.children),
        };

        node.prefix.truncate(lcp);
        node.children
            .insert(split_child.prefix.as_bytes()[0], Box::new(split_child));

        let remainder = &suffix[lcp..];

        if remainder.is_empty() {
            node.entries.push(entry);
        } else {
            node.children
                .insert(remainder.as_bytes()[0], Box::new(Node::leaf(remainder, entry)));
        }

        return;
    }

    let remainder = &suffix[lcp..];

    if remainder.is_empty() {
        node.entries.push(entry);
        return;
    }

    match node.children.get_mut(&remainder.as_bytes()[0]) {
        Some(child) => insert_suffix(child, remainder, entry),
        None => {
            node.children
                .insert(remainder.as_bytes()[0], Box::new(Node::leaf(remainder, entry)));
        }
    }
}

fn longest_common_prefix(a: &str, b: &str) -> usize {
    a.bytes()
        .zip(b.bytes())
        .take_while(|(left, right)| left == right)
        .count()
}

pub(crate) fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
