//! Result types shared by the classifier, the accumulator store and the
//! reconstructor.

use serde::Serialize;
use serde_json::Value;

use crate::replay::ReplayContext;

/// Which wire protocol produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// Action envelope carrying `rows` / `columns` / `status`.
    Enveloped,
    /// `records` / `totalSize` / `done` pages with continuation locators.
    Tabular,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Enveloped => "enveloped",
            Protocol::Tabular => "tabular",
        }
    }
}

/// Server-declared total row count.
///
/// An unknown total is `Unbounded`, never zero: a zero total would make every
/// accumulator look complete on its first page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowTotal {
    Known(u64),
    Unbounded,
}

impl RowTotal {
    /// Raise the total to `declared` when it is an improvement.
    ///
    /// Never lowers a known total.
    pub fn raise(self, declared: u64) -> Self {
        match self {
            RowTotal::Unbounded => RowTotal::Known(declared),
            RowTotal::Known(current) if declared > current => RowTotal::Known(declared),
            other => other,
        }
    }

    /// True when `returned` rows satisfy the declared total.
    pub fn is_reached_by(self, returned: usize) -> bool {
        match self {
            RowTotal::Known(total) => returned as u64 >= total,
            RowTotal::Unbounded => false,
        }
    }

    pub fn known(self) -> Option<u64> {
        match self {
            RowTotal::Known(total) => Some(total),
            RowTotal::Unbounded => None,
        }
    }
}

/// A finished result, emitted when an accumulator completes or is flushed,
/// for self-contained pages, and after a reconstruction run.
#[derive(Debug, Clone)]
pub struct CapturedResult {
    pub query_id: Option<String>,
    pub protocol: Protocol,
    pub rows: Vec<Value>,
    pub columns: Vec<Value>,
    pub total_rows: RowTotal,
    /// Flushed before the declared total was reached.
    pub limited: bool,
    pub replay: Option<ReplayContext>,
}

impl CapturedResult {
    pub fn returned_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Whether the reconstructor has something to work with.
    pub fn can_fetch_more(&self) -> bool {
        self.limited && self.replay.is_some()
    }
}
