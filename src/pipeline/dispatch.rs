//! Hand-off to the external frame transform

use std::time::Instant;

use image::RgbaImage;
use tracing::{debug, instrument};

use crate::pipeline::marshal::MarshalledBuffer;

/// Arguments of one transform call: the marshalled bytes plus the source
/// frame's dimensions and strides.
#[derive(Debug, Clone, Copy)]
pub struct TransformInput<'a> {
    pub bytes: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub luma_row_stride: usize,
    pub chroma_row_stride: usize,
    pub chroma_pixel_stride: usize,
}

/// The processing routine. `None` means this frame produced nothing to show.
///
/// Runs on the pipeline worker and may be slow; it has no cancellation hook.
pub trait FrameTransform: Send {
    fn transform(&mut self, input: TransformInput<'_>) -> Option<RgbaImage>;
}

impl<F> FrameTransform for F
where
    F: FnMut(TransformInput<'_>) -> Option<RgbaImage> + Send,
{
    fn transform(&mut self, input: TransformInput<'_>) -> Option<RgbaImage> {
        self(input)
    }
}

/// Invokes the transform synchronously with a marshalled buffer.
pub struct Dispatcher {
    transform: Box<dyn FrameTransform>,
}

impl Dispatcher {
    pub fn new(transform: Box<dyn FrameTransform>) -> Self {
        Self { transform }
    }

    #[instrument(skip_all, fields(sequence = buffer.sequence()))]
    pub fn dispatch(&mut self, buffer: &MarshalledBuffer) -> Option<RgbaImage> {
        let layout = buffer.layout();
        let input = TransformInput {
            bytes: buffer.as_bytes(),
            width: layout.width,
            height: layout.height,
            luma_row_stride: layout.luma_row_stride,
            chroma_row_stride: layout.chroma_row_stride,
            chroma_pixel_stride: layout.chroma_pixel_stride,
        };

        let started = Instant::now();
        let result = self.transform.transform(input);
        let elapsed = started.elapsed();
        metrics::histogram!("edgecam_dispatch_time_us").record(elapsed.as_micros() as f64);

        if result.is_none() {
            debug!(?elapsed, "transform produced no result");
        }
        result
    }
}
