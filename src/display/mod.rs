pub mod headless;
pub mod presenter;

#[cfg(feature = "sdl-display")]
pub mod sdl;

use std::time::Instant;

use image::RgbaImage;

use crate::error::DisplayError;

pub use headless::HeadlessSurface;
pub use presenter::{Presenter, Telemetry, TelemetryHandle};

#[cfg(feature = "sdl-display")]
pub use sdl::Sdl2Surface;

/// Where processed results end up. Only ever touched on the presentation thread.
pub trait DisplaySurface {
    /// Replace the displayed image.
    fn show(&mut self, image: &RgbaImage) -> Result<(), DisplayError>;

    /// Replace the raw camera preview shown beneath processed results.
    fn show_preview(&mut self, image: &RgbaImage) -> Result<(), DisplayError>;

    /// Remove the processed image, revealing the raw preview.
    fn clear(&mut self) -> Result<(), DisplayError>;

    fn set_status(&mut self, status: &str);

    /// True once the user closed the surface.
    fn closed(&mut self) -> bool {
        false
    }
}

/// Posted from the worker to the presentation thread
#[derive(Debug)]
pub enum PresentEvent {
    Processed(ProcessedFrame),
    /// Raw camera frame accepted while processing was off
    Preview(ProcessedFrame),
    /// The transform ran but produced nothing; the display is left as is
    Missed { sequence: u64 },
}

/// A transform result together with where it came from
#[derive(Debug)]
pub struct ProcessedFrame {
    pub image: RgbaImage,
    pub sequence: u64,
    /// Capture time of the source frame
    pub captured_at: Instant,
    /// Toggle epoch observed before dispatch
    pub epoch: u64,
}
