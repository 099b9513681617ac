//! Camera capability seen by the pipeline

use std::sync::Arc;

use crate::capture::frame::{Frame, Resolution};
use crate::error::OpenFailure;
use crate::pipeline::FrameQueue;

/// Something that can open a stream of frames at a requested resolution.
///
/// `open` runs on the pipeline worker, never on the presentation thread.
pub trait FrameSource: Send {
    fn open(&mut self, resolution: Resolution) -> Result<Box<dyn FrameStream>, OpenFailure>;
}

/// An opened camera stream. Dropping it closes the device.
pub trait FrameStream: Send {
    /// Begin asynchronous delivery. Each frame reaches `sink` exactly once.
    fn start(&mut self, sink: FrameSink) -> Result<(), OpenFailure>;

    /// Halt delivery. Safe to call more than once.
    fn stop(&mut self);

    fn resolution(&self) -> Resolution;
}

/// Delivery endpoint handed to a stream; called from the source's own thread.
#[derive(Clone)]
pub struct FrameSink {
    queue: Arc<FrameQueue>,
}

impl FrameSink {
    pub fn new(queue: Arc<FrameQueue>) -> Self {
        Self { queue }
    }

    /// Transfer ownership of a frame to the pipeline.
    ///
    /// Returns false when the pipeline is shutting down; the frame has already
    /// been released in that case.
    pub fn deliver(&self, frame: Frame) -> bool {
        self.queue.push(frame)
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }
}
