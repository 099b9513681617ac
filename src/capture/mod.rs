pub mod frame;
pub mod source;
pub mod synthetic;

#[cfg(feature = "v4l2")]
pub mod v4l2;

#[cfg(feature = "gstreamer-pipeline")]
pub mod gst_capture;

pub use frame::{Frame, FrameMetadata, PixelFormat, Plane, Resolution};
pub use source::{FrameSink, FrameSource, FrameStream};
pub use synthetic::{SourceCounters, SyntheticSource};

#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Source;

#[cfg(feature = "gstreamer-pipeline")]
pub use gst_capture::GstSource;
