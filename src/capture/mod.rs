//! Where finished results go: the observer pipeline, the capture history and
//! the collaborator traits around them.

pub mod format;
pub mod hub;
pub mod pipeline;
pub mod sink;

pub use format::{DelimitedFormatter, FormatError};
pub use hub::{CaptureEntry, CaptureHub, CaptureSummary};
pub use pipeline::CapturePipeline;
pub use sink::{
    CaptureCounters, CounterSink, CounterSnapshot, Notifier, ResultFormatter, ResultSink,
    TracingNotifier,
};
