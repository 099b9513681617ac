//! Capture-throttle-marshal pipeline

pub mod controller;
pub mod dispatch;
pub mod handler;
pub mod marshal;
pub mod ringbuf;
pub mod stats;
pub mod throttle;
mod toggle;

pub use controller::{PipelineController, PipelineState};
pub use dispatch::{Dispatcher, FrameTransform, TransformInput};
pub use handler::{FrameHandler, FrameOutcome};
pub use marshal::{marshal, FrameLayout, MarshalledBuffer};
pub use ringbuf::{FrameQueue, QueueStats};
pub use stats::{PipelineStats, StatsSnapshot};
pub use throttle::RateLimiter;
pub use toggle::Toggle;
