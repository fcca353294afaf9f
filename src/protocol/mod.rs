pub mod calibration;
pub mod codec;
pub mod correlation;
pub mod engine;
pub mod messages;
pub mod mount;
pub mod state;

pub use engine::EventLoop;
pub use state::GuiderState;
