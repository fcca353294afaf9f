/// Owned exclusively by thread A. Only `Idle` accepts a new recenter event;
/// `Guiding`/`Calibrating` emit the start/done handshake anyway so the host
/// stays consistent, but perform no work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuiderState {
    Unknown,
    Idle,
    Guiding,
    Calibrating,
}
