//! V4L2 camera source with memory-mapped streaming

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::frame::{Frame, FrameMetadata, PixelFormat, Resolution};
use crate::capture::source::{FrameSink, FrameSource, FrameStream};
use crate::error::{OpenFailure, OpenFailureCode};
use crate::CaptureConfig;

const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(500);

fn fourcc(format: PixelFormat) -> FourCC {
    match format {
        PixelFormat::Nv12 => FourCC::new(b"NV12"),
        PixelFormat::Nv21 => FourCC::new(b"NV21"),
        PixelFormat::I420 => FourCC::new(b"YU12"),
    }
}

fn open_failure(err: io::Error) -> OpenFailure {
    match err.kind() {
        io::ErrorKind::PermissionDenied => {
            OpenFailure::new(OpenFailureCode::PermissionDenied, err.to_string())
        }
        io::ErrorKind::NotFound => OpenFailure::new(OpenFailureCode::Hardware, err.to_string()),
        _ => OpenFailure::from_message(err.to_string()),
    }
}

/// Find the first capture device offering `format`.
pub fn auto_detect_device(format: PixelFormat) -> Result<String, OpenFailure> {
    info!("Auto-detecting capture devices...");
    let wanted = fourcc(format);

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            continue;
        }
        if let Ok(formats) = dev.enum_formats() {
            if formats.iter().any(|fmt| fmt.fourcc == wanted) {
                info!("Found {:?} device: {} - {}", format, path, caps.card);
                return Ok(path);
            }
        }
    }

    Err(OpenFailure::new(
        OpenFailureCode::Hardware,
        format!("no capture device offers {:?}", format),
    ))
}

/// Camera behind a V4L2 device node
pub struct V4l2Source {
    device: String,
    format: PixelFormat,
    buffer_count: u32,
}

impl V4l2Source {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            device: config.device.clone(),
            format: config.format,
            buffer_count: config.buffer_count,
        }
    }
}

impl FrameSource for V4l2Source {
    fn open(&mut self, resolution: Resolution) -> Result<Box<dyn FrameStream>, OpenFailure> {
        let path = if self.device.is_empty() {
            auto_detect_device(self.format)?
        } else {
            self.device.clone()
        };
        info!("Initializing V4L2 capture: {}", path);

        let device = Device::with_path(&path).map_err(open_failure)?;
        let caps = device.query_caps().map_err(open_failure)?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(OpenFailure::new(
                OpenFailureCode::Unsupported,
                "device doesn't support video capture",
            ));
        }

        let mut fmt = device.format().map_err(open_failure)?;
        fmt.width = resolution.width;
        fmt.height = resolution.height;
        fmt.fourcc = fourcc(self.format);
        let actual = device.set_format(&fmt).map_err(|e| {
            OpenFailure::new(OpenFailureCode::SessionConfig, e.to_string())
        })?;

        if actual.fourcc != fmt.fourcc {
            return Err(OpenFailure::new(
                OpenFailureCode::Unsupported,
                format!("driver chose {} instead of {}", actual.fourcc, fmt.fourcc),
            ));
        }

        Ok(Box::new(V4l2Stream {
            device: Some(device),
            format: self.format,
            resolution: Resolution::new(actual.width, actual.height),
            stride: actual.stride as usize,
            buffer_count: self.buffer_count,
            stop: Arc::new(AtomicBool::new(false)),
            thread: None,
        }))
    }
}

struct V4l2Stream {
    device: Option<Device>,
    format: PixelFormat,
    resolution: Resolution,
    stride: usize,
    buffer_count: u32,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl FrameStream for V4l2Stream {
    fn start(&mut self, sink: FrameSink) -> Result<(), OpenFailure> {
        let Some(device) = self.device.take() else {
            return Ok(());
        };

        let layout = Layout {
            format: self.format,
            resolution: self.resolution,
            stride: self.stride,
        };
        let buffer_count = self.buffer_count;
        let stop = self.stop.clone();
        let (ready_tx, ready_rx) = flume::bounded(1);

        let handle = thread::Builder::new()
            .name("v4l2-capture".into())
            .spawn(move || {
                let mut stream =
                    match MmapStream::with_buffers(&device, Type::VideoCapture, buffer_count) {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = ready_tx.send(Err(open_failure(e)));
                            return;
                        }
                    };
                stream.set_timeout(DEQUEUE_TIMEOUT);
                let _ = ready_tx.send(Ok(()));
                info!("Capture stream started with {} buffers", buffer_count);

                let mut sequence = 0u64;
                while !stop.load(Ordering::SeqCst) {
                    let timestamp = Instant::now();
                    match stream.next() {
                        Ok((buf, meta)) => {
                            let used = (meta.bytesused as usize).min(buf.len());
                            let data = Bytes::copy_from_slice(&buf[..used]);
                            let device_time = Duration::from_secs(meta.timestamp.sec as u64)
                                + Duration::from_micros(meta.timestamp.usec as u64);
                            sink.deliver(layout.frame(data, sequence, device_time, timestamp));
                            sequence += 1;
                        }
                        Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
                        Err(e) => {
                            warn!("Capture error: {}", e);
                            thread::sleep(Duration::from_millis(10));
                        }
                    }
                }
                debug!(frames = sequence, "V4L2 capture stopped");
            })
            .map_err(open_failure)?;
        self.thread = Some(handle);

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(failure)) => {
                self.stop();
                Err(failure)
            }
            Err(_) => {
                self.stop();
                Err(OpenFailure::new(
                    OpenFailureCode::Hardware,
                    "capture thread exited during startup",
                ))
            }
        }
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("V4L2 capture thread panicked");
            }
        }
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }
}

impl Drop for V4l2Stream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// How the driver lays out one buffer
#[derive(Debug, Clone, Copy)]
struct Layout {
    format: PixelFormat,
    resolution: Resolution,
    stride: usize,
}

impl Layout {
    fn frame(&self, data: Bytes, sequence: u64, device_time: Duration, timestamp: Instant) -> Frame {
        let mut meta = FrameMetadata::new(sequence, self.resolution, self.format);
        meta.device_timestamp = Some(device_time);
        let luma_len = self.stride * self.resolution.height as usize;

        match self.format {
            PixelFormat::Nv12 | PixelFormat::Nv21 => {
                Frame::from_semi_planar(data, meta, self.stride, luma_len, self.stride, timestamp)
            }
            PixelFormat::I420 => {
                let chroma_stride = self.stride / 2;
                let cr_offset = luma_len + chroma_stride * meta.chroma_height();
                Frame::from_planar(
                    data,
                    meta,
                    self.stride,
                    [luma_len, cr_offset],
                    chroma_stride,
                    timestamp,
                )
            }
        }
    }
}
