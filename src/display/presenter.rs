//! Presentation-thread side of the pipeline

use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use tracing::{debug, trace, warn};

use crate::display::{DisplaySurface, PresentEvent, ProcessedFrame};
use crate::pipeline::Toggle;

pub const STATUS_ACTIVE: &str = "EDGE DETECTION: ACTIVE";
pub const STATUS_PREVIEW: &str = "NORMAL CAMERA VIEW";
/// Prefix of the status shown while the camera could not be started
pub const STATUS_CAMERA_ERROR: &str = "CAMERA ERROR";

/// Display-side counters and the current frame-rate estimate
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Telemetry {
    /// `1000 / (now_ms - previous_display_ms)`; unset until two frames were shown
    pub fps: Option<f64>,
    pub displayed: u64,
    pub missed: u64,
    /// Results that arrived after the toggle had moved on
    pub discarded: u64,
    /// Raw previews shown while processing was off
    pub previews: u64,
}

/// Read-only view of the presenter's telemetry for other threads
#[derive(Clone)]
pub struct TelemetryHandle(Arc<ArcSwap<Telemetry>>);

impl TelemetryHandle {
    pub fn load(&self) -> Telemetry {
        **self.0.load()
    }
}

/// Applies worker results to a display surface.
pub struct Presenter<S> {
    surface: S,
    toggle: Arc<Toggle>,
    last_displayed: Option<Instant>,
    telemetry: Telemetry,
    published: Arc<ArcSwap<Telemetry>>,
}

impl<S: DisplaySurface> Presenter<S> {
    pub fn new(surface: S, toggle: Arc<Toggle>) -> Self {
        Self {
            surface,
            toggle,
            last_displayed: None,
            telemetry: Telemetry::default(),
            published: Arc::new(ArcSwap::from_pointee(Telemetry::default())),
        }
    }

    pub fn present(&mut self, event: PresentEvent) {
        match event {
            PresentEvent::Processed(frame) => self.show(frame),
            PresentEvent::Preview(frame) => self.show_preview(frame),
            PresentEvent::Missed { sequence } => {
                debug!(sequence, "no result for frame");
                self.telemetry.missed += 1;
            }
        }
        self.publish();
    }

    /// Reflect a toggle transition. Disabling drops the processed image at once.
    pub fn apply_toggle(&mut self, enabled: bool) {
        if enabled {
            self.surface.set_status(STATUS_ACTIVE);
        } else {
            self.clear();
            self.surface.set_status(STATUS_PREVIEW);
        }
    }

    pub fn clear(&mut self) {
        if let Err(e) = self.surface.clear() {
            warn!("Failed to clear display: {}", e);
        }
        self.last_displayed = None;
        self.telemetry.fps = None;
        self.publish();
    }

    /// Forget per-session timing; called when the pipeline (re)starts.
    pub fn reset_session(&mut self) {
        self.last_displayed = None;
        self.telemetry.fps = None;
        self.publish();
    }

    /// Show why the pipeline is not running.
    pub fn report_failure(&mut self, reason: &str) {
        self.clear();
        self.surface
            .set_status(&format!("{}: {}", STATUS_CAMERA_ERROR, reason));
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn telemetry(&self) -> Telemetry {
        self.telemetry
    }

    pub fn telemetry_handle(&self) -> TelemetryHandle {
        TelemetryHandle(self.published.clone())
    }

    fn show(&mut self, frame: ProcessedFrame) {
        let (epoch, enabled) = self.toggle.observe();
        if frame.epoch != epoch || !enabled {
            debug!(sequence = frame.sequence, "discarding result from earlier toggle state");
            self.telemetry.discarded += 1;
            return;
        }

        if let Err(e) = self.surface.show(&frame.image) {
            warn!("Failed to display frame {}: {}", frame.sequence, e);
            return;
        }
        self.telemetry.displayed += 1;

        let now = frame.captured_at;
        if let Some(previous) = self.last_displayed {
            let elapsed_ms = now.saturating_duration_since(previous).as_secs_f64() * 1000.0;
            if elapsed_ms > 0.0 {
                let fps = 1000.0 / elapsed_ms;
                self.telemetry.fps = Some(fps);
                self.surface
                    .set_status(&format!("EDGE DETECTION - FPS: {}", fps as u32));
            }
        }
        self.last_displayed = Some(now);
    }

    fn show_preview(&mut self, frame: ProcessedFrame) {
        let (epoch, enabled) = self.toggle.observe();
        if frame.epoch != epoch || enabled {
            trace!(sequence = frame.sequence, "dropping preview from earlier toggle state");
            return;
        }
        if let Err(e) = self.surface.show_preview(&frame.image) {
            warn!("Failed to display preview {}: {}", frame.sequence, e);
            return;
        }
        self.telemetry.previews += 1;
    }

    fn publish(&self) {
        self.published.store(Arc::new(self.telemetry));
    }
}
