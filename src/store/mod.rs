pub mod reference_store;
pub mod log_sink;

pub use reference_store::{ObservingKey, FlipStatusKey, ReferenceStore, promote_reference};
pub use log_sink::{CorrectionRecord, LogEntry, GuideLogSink, FileLogSink};
