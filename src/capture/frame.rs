use std::fmt;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Called exactly once when a frame leaves the pipeline, with its sequence number.
pub type ReleaseHook = Box<dyn FnOnce(u64) + Send>;

/// One captured image unit: a luma plane followed by two chroma planes (Cb, Cr).
///
/// A frame has exactly one owner. Plane memory belongs to the provider until the
/// frame is dropped, at which point the release hook (if any) hands it back.
pub struct Frame {
    pub meta: FrameMetadata,

    /// Planes in capture order: Y, Cb, Cr
    pub planes: Vec<Plane>,

    /// Capture timestamp, used for throttling and display telemetry
    pub timestamp: Instant,

    release: Option<ReleaseHook>,
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// Chroma sub-sampling factor, applied to both dimensions (2 for 4:2:0)
    pub subsampling: u32,
    pub format: PixelFormat,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

/// One channel's pixel data.
#[derive(Debug, Clone)]
pub struct Plane {
    pub data: Bytes,
    /// Bytes from the start of one row to the start of the next
    pub row_stride: usize,
    /// Bytes between consecutive samples within a row
    pub pixel_stride: usize,
}

/// Memory layouts the sources know how to split into planes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Y plane, then interleaved Cb/Cr
    Nv12,
    /// Y plane, then interleaved Cr/Cb
    Nv21,
    /// Y plane, then a full Cb plane, then a full Cr plane
    I420,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FrameMetadata {
    pub fn new(sequence: u64, resolution: Resolution, format: PixelFormat) -> Self {
        Self {
            sequence,
            width: resolution.width,
            height: resolution.height,
            subsampling: 2,
            format,
            device_timestamp: None,
        }
    }

    pub fn chroma_width(&self) -> usize {
        div_ceil(self.width as usize, self.subsampling.max(1) as usize)
    }

    pub fn chroma_height(&self) -> usize {
        div_ceil(self.height as usize, self.subsampling.max(1) as usize)
    }
}

impl Plane {
    pub fn new(data: Bytes, row_stride: usize, pixel_stride: usize) -> Self {
        Self {
            data,
            row_stride,
            pixel_stride,
        }
    }
}

impl Frame {
    pub fn new(meta: FrameMetadata, planes: Vec<Plane>, timestamp: Instant) -> Self {
        Self {
            meta,
            planes,
            timestamp,
            release: None,
        }
    }

    /// Attach the provider's release notification.
    pub fn with_release_hook(mut self, hook: ReleaseHook) -> Self {
        self.release = Some(hook);
        self
    }

    /// Split one semi-planar buffer (NV12 or NV21) into three planes.
    ///
    /// Both chroma planes view the same interleaved region with a pixel stride of
    /// 2, offset by one byte from each other.
    pub fn from_semi_planar(
        data: Bytes,
        meta: FrameMetadata,
        luma_stride: usize,
        chroma_offset: usize,
        chroma_stride: usize,
        timestamp: Instant,
    ) -> Self {
        let luma = slice_from(&data, 0);
        let interleaved = slice_from(&data, chroma_offset);
        let (cb_offset, cr_offset) = match meta.format {
            PixelFormat::Nv21 => (1, 0),
            _ => (0, 1),
        };

        let planes = vec![
            Plane::new(luma, luma_stride, 1),
            Plane::new(slice_from(&interleaved, cb_offset), chroma_stride, 2),
            Plane::new(slice_from(&interleaved, cr_offset), chroma_stride, 2),
        ];
        Self::new(meta, planes, timestamp)
    }

    /// Split one fully planar buffer (I420) into three planes.
    pub fn from_planar(
        data: Bytes,
        meta: FrameMetadata,
        luma_stride: usize,
        chroma_offsets: [usize; 2],
        chroma_stride: usize,
        timestamp: Instant,
    ) -> Self {
        let planes = vec![
            Plane::new(slice_from(&data, 0), luma_stride, 1),
            Plane::new(slice_from(&data, chroma_offsets[0]), chroma_stride, 1),
            Plane::new(slice_from(&data, chroma_offsets[1]), chroma_stride, 1),
        ];
        Self::new(meta, planes, timestamp)
    }

    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.meta.width, self.meta.height)
    }

    /// Hand the frame back to its provider. Equivalent to dropping it.
    pub fn release(self) {}
}

impl Drop for Frame {
    fn drop(&mut self) {
        if let Some(hook) = self.release.take() {
            hook(self.meta.sequence);
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("meta", &self.meta)
            .field("planes", &self.planes.len())
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

// Out-of-range offsets yield an empty plane; the marshaller rejects it.
fn slice_from(data: &Bytes, offset: usize) -> Bytes {
    data.slice(offset.min(data.len())..)
}

fn div_ceil(value: usize, divisor: usize) -> usize {
    (value + divisor - 1) / divisor
}
