pub mod pid;
pub mod ring_buffer;
pub mod direction;
pub mod pipeline;
pub mod frame_slot;
pub mod worker;

pub use frame_slot::{FrameRequest, FrameSlot};
pub use worker::{GuideWorker, WorkerOutcome};
