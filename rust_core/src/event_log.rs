//! Consumer-group event log abstraction.
//!
//! This module provides:
//! - `EventLog` - Append / group read / acknowledge over named streams
//! - `LogRecord` - One delivered entry with its string fields
//! - `MemoryEventLog` - In-process log with the same delivery semantics,
//!   used for replays and tests
//!
//! Delivery is at-least-once: an entry handed to a consumer stays pending
//! for the group until acknowledged, and a `ReadFrom::Pending` read hands
//! it out again.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Notify;

/// Where a group read starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFrom {
    /// Entries delivered to this consumer but not yet acknowledged
    Pending,
    /// Entries never delivered to the group
    New,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub stream: String,
    pub id: String,
    pub fields: HashMap<String, String>,
}

impl LogRecord {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

#[async_trait]
pub trait EventLog: Send + Sync {
    /// Create the consumer group on each stream, creating streams as needed.
    /// An existing group is not an error.
    async fn ensure_group(&self, streams: &[String], group: &str) -> Result<()>;

    /// Read up to `count` entries per stream. `block_ms` only applies to
    /// `ReadFrom::New`; zero means do not block.
    async fn read_group(
        &self,
        streams: &[String],
        group: &str,
        consumer: &str,
        from: ReadFrom,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<LogRecord>>;

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<()>;

    /// Append an entry, returning its id.
    async fn append(&self, stream: &str, fields: &[(&str, String)]) -> Result<String>;
}

// ============================================================================
// In-memory implementation
// ============================================================================

#[derive(Debug, Default)]
struct GroupCursor {
    /// Index of the next never-delivered entry
    next_index: usize,
    /// Delivered, unacknowledged entry ids in delivery order
    pending: Vec<String>,
}

#[derive(Debug, Default)]
struct MemoryStream {
    entries: Vec<(String, HashMap<String, String>)>,
    groups: HashMap<String, GroupCursor>,
    next_seq: u64,
}

impl MemoryStream {
    fn record(&self, stream: &str, index: usize) -> LogRecord {
        let (id, fields) = &self.entries[index];
        LogRecord {
            stream: stream.to_string(),
            id: id.clone(),
            fields: fields.clone(),
        }
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|(entry_id, _)| entry_id == id)
    }
}

/// Single-process event log with consumer-group delivery.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    streams: Mutex<HashMap<String, MemoryStream>>,
    appended: Notify,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every entry ever appended to a stream, in order.
    pub fn entries(&self, stream: &str) -> Vec<HashMap<String, String>> {
        self.streams
            .lock()
            .get(stream)
            .map(|s| s.entries.iter().map(|(_, fields)| fields.clone()).collect())
            .unwrap_or_default()
    }

    pub fn pending_count(&self, stream: &str, group: &str) -> usize {
        self.streams
            .lock()
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map_or(0, |cursor| cursor.pending.len())
    }

    fn collect(&self, streams: &[String], group: &str, from: ReadFrom, count: usize) -> Result<Vec<LogRecord>> {
        let mut all = self.streams.lock();
        let mut out = Vec::new();
        for name in streams {
            let stream = all
                .get_mut(name)
                .ok_or_else(|| anyhow!("NOGROUP no such stream: {}", name))?;
            let mut cursor = stream
                .groups
                .remove(group)
                .ok_or_else(|| anyhow!("NOGROUP no group {} on {}", group, name))?;

            match from {
                ReadFrom::Pending => {
                    for id in cursor.pending.iter().take(count) {
                        if let Some(index) = stream.index_of(id) {
                            out.push(stream.record(name, index));
                        }
                    }
                }
                ReadFrom::New => {
                    let end = (cursor.next_index + count).min(stream.entries.len());
                    for index in cursor.next_index..end {
                        let record = stream.record(name, index);
                        cursor.pending.push(record.id.clone());
                        out.push(record);
                    }
                    cursor.next_index = end;
                }
            }
            stream.groups.insert(group.to_string(), cursor);
        }
        Ok(out)
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn ensure_group(&self, streams: &[String], group: &str) -> Result<()> {
        let mut all = self.streams.lock();
        for name in streams {
            all.entry(name.clone())
                .or_default()
                .groups
                .entry(group.to_string())
                .or_default();
        }
        Ok(())
    }

    async fn read_group(
        &self,
        streams: &[String],
        group: &str,
        _consumer: &str,
        from: ReadFrom,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<LogRecord>> {
        let records = self.collect(streams, group, from, count)?;
        if !records.is_empty() || from == ReadFrom::Pending || block_ms == 0 {
            return Ok(records);
        }
        let _ = tokio::time::timeout(Duration::from_millis(block_ms), self.appended.notified()).await;
        self.collect(streams, group, from, count)
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<()> {
        if let Some(cursor) = self
            .streams
            .lock()
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
        {
            cursor.pending.retain(|pending| pending != id);
        }
        Ok(())
    }

    async fn append(&self, stream: &str, fields: &[(&str, String)]) -> Result<String> {
        let id = {
            let mut all = self.streams.lock();
            let stream = all.entry(stream.to_string()).or_default();
            stream.next_seq += 1;
            let id = format!("{}-0", stream.next_seq);
            let fields = fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect();
            stream.entries.push((id.clone(), fields));
            id
        };
        self.appended.notify_one();
        Ok(id)
    }
}
