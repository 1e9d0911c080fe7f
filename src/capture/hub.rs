use parking_lot::RwLock;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::capture::sink::{CounterSink, Notifier, ResultSink};
use crate::model::{CapturedResult, Protocol};

/// A finished result held in the capture history.
#[derive(Debug, Clone)]
pub struct CaptureEntry {
    pub id: Uuid,
    pub captured_at: SystemTime,
    pub result: CapturedResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptureSummary {
    pub id: Uuid,
    pub captured_at_ms: u64,
    pub protocol: Protocol,
    pub query_id: Option<String>,
    pub rows: usize,
    pub columns: usize,
    pub total_rows: Option<u64>,
    pub limited: bool,
    pub can_fetch_more: bool,
}

impl From<&CaptureEntry> for CaptureSummary {
    fn from(entry: &CaptureEntry) -> Self {
        let result = &entry.result;
        Self {
            id: entry.id,
            captured_at_ms: entry
                .captured_at
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
            protocol: result.protocol,
            query_id: result.query_id.clone(),
            rows: result.returned_rows(),
            columns: result.column_count(),
            total_rows: result.total_rows.known(),
            limited: result.limited,
            can_fetch_more: result.can_fetch_more(),
        }
    }
}

/// Bounded history of finished results, oldest evicted first.
pub struct CaptureHub {
    capacity: usize,
    entries: RwLock<VecDeque<CaptureEntry>>,
    notifier: Arc<dyn Notifier>,
    counters: Arc<dyn CounterSink>,
}

impl CaptureHub {
    pub fn new(capacity: usize, notifier: Arc<dyn Notifier>, counters: Arc<dyn CounterSink>) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: RwLock::new(VecDeque::with_capacity(capacity.max(1))),
            notifier,
            counters,
        }
    }

    /// Store a result and announce it. Returns the new capture id.
    pub fn push(&self, result: CapturedResult) -> Uuid {
        let entry = CaptureEntry {
            id: Uuid::new_v4(),
            captured_at: SystemTime::now(),
            result,
        };
        let id = entry.id;
        self.announce(&entry);

        let mut entries = self.entries.write();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
        id
    }

    /// Swap in a new result for an existing capture, e.g. after a fetch-all.
    ///
    /// Returns `None` when the capture was evicted in the meantime.
    pub fn replace(&self, id: Uuid, result: CapturedResult) -> Option<CaptureSummary> {
        let mut entries = self.entries.write();
        let entry = entries.iter_mut().find(|entry| entry.id == id)?;
        entry.result = result;
        entry.captured_at = SystemTime::now();
        self.announce(entry);
        Some(CaptureSummary::from(&*entry))
    }

    pub fn get(&self, id: Uuid) -> Option<CaptureEntry> {
        self.entries.read().iter().find(|entry| entry.id == id).cloned()
    }

    pub fn summaries(&self) -> Vec<CaptureSummary> {
        self.entries.read().iter().map(CaptureSummary::from).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn announce(&self, entry: &CaptureEntry) {
        self.counters
            .record(entry.result.returned_rows(), entry.result.column_count());
        self.notifier.notify(entry);
    }
}

impl ResultSink for CaptureHub {
    fn on_result(&self, result: CapturedResult) {
        self.push(result);
    }
}
