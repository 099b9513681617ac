//! GStreamer camera source delivering raw 4:2:0 frames through an appsink

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{debug, info, warn};

use crate::capture::frame::{Frame, FrameMetadata, PixelFormat, Resolution};
use crate::capture::source::{FrameSink, FrameSource, FrameStream};
use crate::error::{OpenFailure, OpenFailureCode};
use crate::CaptureConfig;

const STATE_TIMEOUT_SECS: u64 = 5;

fn caps_format(format: PixelFormat) -> &'static str {
    match format {
        PixelFormat::Nv12 => "NV12",
        PixelFormat::Nv21 => "NV21",
        PixelFormat::I420 => "I420",
    }
}

fn session_failure(reason: impl Into<String>) -> OpenFailure {
    OpenFailure::new(OpenFailureCode::SessionConfig, reason)
}

/// Camera behind a `v4l2src ! videoconvert ! appsink` pipeline
pub struct GstSource {
    device: String,
    format: PixelFormat,
    fps: u32,
    buffer_count: u32,
}

impl GstSource {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            device: config.device.clone(),
            format: config.format,
            fps: config.fps,
            buffer_count: config.buffer_count,
        }
    }

    fn pipeline_string(&self, resolution: Resolution) -> String {
        let source = if self.device.is_empty() {
            "autovideosrc".to_string()
        } else {
            format!("v4l2src device={}", self.device)
        };
        format!(
            "{} name=source ! \
             videoconvert ! videoscale ! \
             video/x-raw,format={},width={},height={},framerate={}/1 ! \
             appsink name=appsink",
            source,
            caps_format(self.format),
            resolution.width,
            resolution.height,
            self.fps.max(1)
        )
    }
}

impl FrameSource for GstSource {
    fn open(&mut self, resolution: Resolution) -> Result<Box<dyn FrameStream>, OpenFailure> {
        gst::init().map_err(|e| {
            OpenFailure::new(
                OpenFailureCode::Hardware,
                format!("Failed to initialize GStreamer: {}", e),
            )
        })?;

        let description = self.pipeline_string(resolution);
        info!("Pipeline: {}", description);

        let pipeline = gst::parse::launch(&description)
            .map_err(|e| session_failure(e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| session_failure("Failed to create pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .ok_or_else(|| session_failure("Failed to find appsink element"))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| session_failure("Failed to cast to AppSink"))?;

        appsink.set_property("max-buffers", self.buffer_count.max(1));
        appsink.set_property("drop", true);
        appsink.set_property("sync", false);

        Ok(Box::new(GstStream {
            pipeline,
            appsink,
            format: self.format,
            resolution,
            started: false,
        }))
    }
}

struct GstStream {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    format: PixelFormat,
    resolution: Resolution,
    started: bool,
}

impl FrameStream for GstStream {
    fn start(&mut self, sink: FrameSink) -> Result<(), OpenFailure> {
        if self.started {
            return Ok(());
        }

        let format = self.format;
        let sequence = Arc::new(AtomicU64::new(0));
        self.appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = appsink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    let seq = sequence.fetch_add(1, Ordering::SeqCst);
                    match frame_from_sample(&sample, format, seq) {
                        Some(frame) => {
                            if !sink.deliver(frame) {
                                return Err(gst::FlowError::Flushing);
                            }
                        }
                        None => warn!("Dropping unusable sample {}", seq),
                    }
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        info!("Starting GStreamer pipeline");
        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| OpenFailure::from_message(format!("Failed to start pipeline: {:?}", e)))?;

        let (state_change, _, _) = self
            .pipeline
            .state(Some(gst::ClockTime::from_seconds(STATE_TIMEOUT_SECS)));
        match state_change {
            Ok(gst::StateChangeSuccess::Success) | Ok(gst::StateChangeSuccess::Async) => {
                self.started = true;
                Ok(())
            }
            _ => {
                let _ = self.pipeline.set_state(gst::State::Null);
                Err(OpenFailure::new(
                    OpenFailureCode::Hardware,
                    "pipeline did not reach PLAYING",
                ))
            }
        }
    }

    fn stop(&mut self) {
        if !self.started {
            return;
        }
        self.started = false;
        debug!("Stopping GStreamer pipeline");
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!("Failed to stop pipeline: {:?}", e);
        }
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }
}

impl Drop for GstStream {
    fn drop(&mut self) {
        self.stop();
    }
}

fn frame_from_sample(sample: &gst::Sample, format: PixelFormat, sequence: u64) -> Option<Frame> {
    let timestamp = Instant::now();
    let buffer = sample.buffer()?;
    let info = gst_video::VideoInfo::from_caps(sample.caps()?).ok()?;
    let map = buffer.map_readable().ok()?;
    let data = Bytes::copy_from_slice(map.as_slice());

    let mut meta = FrameMetadata::new(
        sequence,
        Resolution::new(info.width(), info.height()),
        format,
    );
    meta.device_timestamp = buffer.pts().map(|pts| Duration::from_nanos(pts.nseconds()));

    let offsets = info.offset();
    let strides = info.stride();
    if offsets.len() < 2 {
        return None;
    }
    let Some((luma_stride, chroma_stride)) = plane_strides(strides) else {
        debug!("sample {} has strides {:?}", sequence, strides);
        return None;
    };

    Some(match format {
        PixelFormat::Nv12 | PixelFormat::Nv21 => Frame::from_semi_planar(
            data,
            meta,
            luma_stride,
            offsets[1],
            chroma_stride,
            timestamp,
        ),
        PixelFormat::I420 => {
            let cr_offset = *offsets.get(2)?;
            Frame::from_planar(
                data,
                meta,
                luma_stride,
                [offsets[1], cr_offset],
                chroma_stride,
                timestamp,
            )
        }
    })
}

/// Luma and chroma row strides. Negative strides describe bottom-up layouts,
/// which are not supported.
fn plane_strides(strides: &[i32]) -> Option<(usize, usize)> {
    let luma = usize::try_from(*strides.first()?).ok()?;
    let chroma = usize::try_from(*strides.get(1)?).ok()?;
    Some((luma, chroma))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_strides_are_unusable() {
        assert_eq!(plane_strides(&[640, 640]), Some((640, 640)));
        assert_eq!(plane_strides(&[-640, 640]), None);
        assert_eq!(plane_strides(&[640, -320, -320]), None);
        assert_eq!(plane_strides(&[640]), None);
    }
}
