use std::path::PathBuf;
use std::sync::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::options::guiding::FlipState;

/// A frame notification handed from thread A to thread B: the container-view
/// path of the new image plus the mount flip state observed just before the
/// hand-off (the mount-flip tracker runs on thread A, ahead of the worker).
#[derive(Debug, Clone)]
pub struct FrameRequest {
    pub path: PathBuf,
    pub flip_state: FlipState,
}

/// The single-slot, condition-protected hand-off between the event loop and
/// the guide worker. Holds at most one pending frame; the producer
/// overwrites a slot that the worker hasn't collected yet only if it races
/// ahead, which the protocol design prevents by waiting on the rendezvous
/// channel before signalling again.
#[derive(Default)]
pub struct FrameSlot {
    slot: Mutex<Option<FrameRequest>>,
    cond: Condvar,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self { slot: Mutex::new(None), cond: Condvar::new() }
    }

    pub fn signal(&self, request: FrameRequest) {
        let mut slot = self.slot.lock().unwrap();
        *slot = Some(request);
        self.cond.notify_one();
    }

    /// Blocks until a frame is available or `exit_flag` is set, polling the
    /// latter periodically since the condvar alone cannot observe it.
    pub fn wait_and_take(&self, exit_flag: &AtomicBool) -> Option<FrameRequest> {
        let mut slot = self.slot.lock().unwrap();
        loop {
            if let Some(request) = slot.take() {
                return Some(request);
            }
            if exit_flag.load(Ordering::Relaxed) {
                return None;
            }
            let (guard, _timeout) = self.cond
                .wait_timeout(slot, Duration::from_millis(200))
                .unwrap();
            slot = guard;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_then_take_round_trips() {
        let slot = FrameSlot::new();
        let exit_flag = AtomicBool::new(false);
        slot.signal(FrameRequest { path: PathBuf::from("/a.fits"), flip_state: FlipState::Before });
        let request = slot.wait_and_take(&exit_flag).unwrap();
        assert_eq!(request.path, PathBuf::from("/a.fits"));
    }

    #[test]
    fn exit_flag_unblocks_wait() {
        let slot = FrameSlot::new();
        let exit_flag = AtomicBool::new(true);
        assert!(slot.wait_and_take(&exit_flag).is_none());
    }
}
