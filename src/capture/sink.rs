//! Collaborator interfaces for finished results.

use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::capture::format::FormatError;
use crate::capture::hub::CaptureEntry;
use crate::model::CapturedResult;

/// Receives every finished result.
pub trait ResultSink: Send + Sync {
    fn on_result(&self, result: CapturedResult);
}

/// Tells the user a result is ready and what can be done with it.
pub trait Notifier: Send + Sync {
    fn notify(&self, entry: &CaptureEntry);
}

/// Row/column bookkeeping for each finished result.
pub trait CounterSink: Send + Sync {
    fn record(&self, rows: usize, columns: usize);
}

/// Serializes rows into delimited text.
pub trait ResultFormatter: Send + Sync {
    fn format(&self, rows: &[Value], columns: &[Value]) -> Result<String, FormatError>;

    fn content_type(&self) -> &'static str {
        "text/csv; charset=utf-8"
    }
}

/// Notifier that logs the capture and the control API actions for it.
pub struct TracingNotifier {
    control_prefix: String,
}

impl TracingNotifier {
    pub fn new(control_prefix: impl Into<String>) -> Self {
        Self {
            control_prefix: control_prefix.into(),
        }
    }
}

impl Notifier for TracingNotifier {
    fn notify(&self, entry: &CaptureEntry) {
        let result = &entry.result;
        let download = format!("GET {}/captures/{}/download", self.control_prefix, entry.id);

        if result.can_fetch_more() {
            tracing::info!(
                capture = %entry.id,
                rows = result.returned_rows(),
                total = ?result.total_rows.known(),
                download = %download,
                fetch_all = %format!("POST {}/captures/{}/fetch-all", self.control_prefix, entry.id),
                "Captured limited result"
            );
        } else {
            tracing::info!(
                capture = %entry.id,
                rows = result.returned_rows(),
                columns = result.column_count(),
                download = %download,
                "Captured result"
            );
        }
    }
}

/// Running totals across all finished results.
#[derive(Debug, Default)]
pub struct CaptureCounters {
    results: AtomicU64,
    rows: AtomicU64,
    last_columns: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CounterSnapshot {
    pub results: u64,
    pub rows: u64,
    pub last_columns: u64,
}

impl CaptureCounters {
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            results: self.results.load(Ordering::Relaxed),
            rows: self.rows.load(Ordering::Relaxed),
            last_columns: self.last_columns.load(Ordering::Relaxed),
        }
    }
}

impl CounterSink for CaptureCounters {
    fn record(&self, rows: usize, columns: usize) {
        self.results.fetch_add(1, Ordering::Relaxed);
        self.rows.fetch_add(rows as u64, Ordering::Relaxed);
        self.last_columns.store(columns as u64, Ordering::Relaxed);
    }
}
