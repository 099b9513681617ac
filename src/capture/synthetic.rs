//! Test-pattern camera: a moving luma gradient with flat chroma
//!
//! Produces padded rows and semi-planar chroma like phone camera stacks do, and
//! keeps a bounded pool of outstanding frames: while every pool slot is held by
//! the pipeline, production stalls.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use crate::capture::frame::{Frame, FrameMetadata, PixelFormat, Resolution};
use crate::capture::source::{FrameSink, FrameSource, FrameStream};
use crate::error::{OpenFailure, OpenFailureCode};

/// Cb and Cr values written into every chroma sample
pub const PATTERN_CB: u8 = 0x70;
pub const PATTERN_CR: u8 = 0xA0;

/// Production and release counts, shared with whoever created the source
#[derive(Debug, Default)]
pub struct SourceCounters {
    opened: AtomicU64,
    produced: AtomicU64,
    released: AtomicU64,
    stalled: AtomicU64,
}

impl SourceCounters {
    pub fn opened(&self) -> u64 {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn produced(&self) -> u64 {
        self.produced.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::SeqCst)
    }

    /// Production attempts skipped because the pool was exhausted
    pub fn stalled(&self) -> u64 {
        self.stalled.load(Ordering::SeqCst)
    }

    /// Frames handed out and not yet returned
    pub fn outstanding(&self) -> u64 {
        self.produced().saturating_sub(self.released())
    }
}

#[derive(Debug, Clone)]
pub struct SyntheticSource {
    interval: Duration,
    pool_size: usize,
    format: PixelFormat,
    row_padding: usize,
    open_failure: Option<OpenFailure>,
    counters: Arc<SourceCounters>,
}

impl SyntheticSource {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            pool_size: 3,
            format: PixelFormat::Nv21,
            row_padding: 32,
            open_failure: None,
            counters: Arc::new(SourceCounters::default()),
        }
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size.max(1);
        self
    }

    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    /// Extra bytes at the end of every luma row
    pub fn with_row_padding(mut self, row_padding: usize) -> Self {
        self.row_padding = row_padding;
        self
    }

    /// Make every `open` fail, as a busy or forbidden device would.
    pub fn failing(mut self, failure: OpenFailure) -> Self {
        self.open_failure = Some(failure);
        self
    }

    pub fn counters(&self) -> Arc<SourceCounters> {
        self.counters.clone()
    }
}

impl FrameSource for SyntheticSource {
    fn open(&mut self, resolution: Resolution) -> Result<Box<dyn FrameStream>, OpenFailure> {
        if let Some(failure) = &self.open_failure {
            return Err(failure.clone());
        }
        if resolution.width == 0 || resolution.height == 0 {
            return Err(OpenFailure::new(
                OpenFailureCode::Unsupported,
                format!("cannot produce {} frames", resolution),
            ));
        }

        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        info!(
            "Synthetic camera opened: {} {:?} every {:?}",
            resolution, self.format, self.interval
        );
        Ok(Box::new(SyntheticStream {
            pattern: Pattern {
                resolution,
                format: self.format,
                row_padding: self.row_padding,
            },
            interval: self.interval,
            pool_size: self.pool_size as u64,
            counters: self.counters.clone(),
            stop: Arc::new(AtomicBool::new(false)),
            thread: None,
        }))
    }
}

struct SyntheticStream {
    pattern: Pattern,
    interval: Duration,
    pool_size: u64,
    counters: Arc<SourceCounters>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl FrameStream for SyntheticStream {
    fn start(&mut self, sink: FrameSink) -> Result<(), OpenFailure> {
        if self.thread.is_some() {
            return Ok(());
        }

        let pattern = self.pattern.clone();
        let interval = self.interval;
        let pool_size = self.pool_size;
        let counters = self.counters.clone();
        let stop = self.stop.clone();

        let handle = thread::Builder::new()
            .name("synthetic-camera".into())
            .spawn(move || {
                let mut sequence = 0u64;
                let mut next_due = Instant::now();
                while !stop.load(Ordering::SeqCst) {
                    if counters.outstanding() >= pool_size {
                        counters.stalled.fetch_add(1, Ordering::SeqCst);
                        trace!("frame pool exhausted");
                        thread::sleep(Duration::from_millis(1));
                        continue;
                    }

                    let released = counters.clone();
                    let frame = pattern.render(sequence).with_release_hook(Box::new(move |_| {
                        released.released.fetch_add(1, Ordering::SeqCst);
                    }));
                    counters.produced.fetch_add(1, Ordering::SeqCst);
                    sink.deliver(frame);
                    sequence += 1;

                    next_due += interval;
                    let now = Instant::now();
                    if next_due > now {
                        thread::sleep(next_due - now);
                    } else {
                        next_due = now;
                    }
                }
                debug!(frames = sequence, "synthetic camera stopped");
            })
            .map_err(|e| OpenFailure::new(OpenFailureCode::Hardware, e.to_string()))?;

        self.thread = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("Synthetic camera thread panicked");
            }
        }
    }

    fn resolution(&self) -> Resolution {
        self.pattern.resolution
    }
}

impl Drop for SyntheticStream {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Debug, Clone)]
struct Pattern {
    resolution: Resolution,
    format: PixelFormat,
    row_padding: usize,
}

impl Pattern {
    fn render(&self, sequence: u64) -> Frame {
        let width = self.resolution.width as usize;
        let height = self.resolution.height as usize;
        let meta = FrameMetadata::new(sequence, self.resolution, self.format);
        let (chroma_width, chroma_height) = (meta.chroma_width(), meta.chroma_height());
        let luma_stride = width + self.row_padding;
        let shift = (sequence * 4) as usize;

        let mut data = vec![0u8; luma_stride * height];
        for row in 0..height {
            let line = &mut data[row * luma_stride..row * luma_stride + width];
            for (col, px) in line.iter_mut().enumerate() {
                *px = (col + row + shift) as u8;
            }
        }
        let chroma_offset = data.len();

        match self.format {
            PixelFormat::I420 => {
                let chroma_stride = chroma_width + self.row_padding / 2;
                let plane_len = chroma_stride * chroma_height;
                for value in [PATTERN_CB, PATTERN_CR] {
                    let start = data.len();
                    data.resize(start + plane_len, 0);
                    for row in 0..chroma_height {
                        let at = start + row * chroma_stride;
                        data[at..at + chroma_width].fill(value);
                    }
                }
                Frame::from_planar(
                    Bytes::from(data),
                    meta,
                    luma_stride,
                    [chroma_offset, chroma_offset + plane_len],
                    chroma_stride,
                    Instant::now(),
                )
            }
            PixelFormat::Nv12 | PixelFormat::Nv21 => {
                let pair = match self.format {
                    PixelFormat::Nv21 => [PATTERN_CR, PATTERN_CB],
                    _ => [PATTERN_CB, PATTERN_CR],
                };
                // Rows share the luma stride; the last one carries no padding.
                let chroma_stride = luma_stride.max(2 * chroma_width);
                for row in 0..chroma_height {
                    for _ in 0..chroma_width {
                        data.extend_from_slice(&pair);
                    }
                    if row + 1 < chroma_height {
                        data.resize(data.len() + chroma_stride - 2 * chroma_width, 0);
                    }
                }
                Frame::from_semi_planar(
                    Bytes::from(data),
                    meta,
                    luma_stride,
                    chroma_offset,
                    chroma_stride,
                    Instant::now(),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{marshal, FrameQueue};

    #[test]
    fn rendered_frames_marshal_with_cr_first() {
        for format in [PixelFormat::Nv21, PixelFormat::Nv12, PixelFormat::I420] {
            let pattern = Pattern {
                resolution: Resolution::new(16, 8),
                format,
                row_padding: 8,
            };
            let buffer = marshal(&pattern.render(1)).unwrap();

            assert_eq!(buffer.len(), 16 * 8 + 2 * 8 * 4, "{:?}", format);
            assert!(buffer.cr().iter().all(|&v| v == PATTERN_CR), "{:?}", format);
            assert!(buffer.cb().iter().all(|&v| v == PATTERN_CB), "{:?}", format);
            assert_eq!(buffer.luma()[1], 5, "{:?}", format);
        }
    }

    #[test]
    fn failing_source_reports_open_failure() {
        let failure = OpenFailure::new(OpenFailureCode::DeviceBusy, "in use");
        let mut source = SyntheticSource::new(Duration::from_millis(5)).failing(failure.clone());

        let err = source.open(Resolution::new(64, 48)).err().expect("failure");
        assert_eq!(err, failure);
        assert_eq!(source.counters().opened(), 0);
    }

    #[test]
    fn stream_stalls_when_pool_is_held() {
        let mut source = SyntheticSource::new(Duration::from_millis(1)).with_pool_size(2);
        let counters = source.counters();
        let queue = Arc::new(FrameQueue::new(8));
        let mut stream = source.open(Resolution::new(8, 8)).unwrap();
        stream.start(FrameSink::new(queue.clone())).unwrap();

        thread::sleep(Duration::from_millis(50));
        assert_eq!(counters.outstanding(), 2);
        assert!(counters.stalled() > 0);

        stream.stop();
        stream.stop();
        queue.close();
        assert!(queue.next_frame().is_none());
        assert_eq!(counters.outstanding(), 0);
    }
}
