//! Window-less surface: keeps the latest image in memory

use std::path::{Path, PathBuf};

use image::RgbaImage;
use tracing::{debug, info};

use crate::display::DisplaySurface;
use crate::error::DisplayError;

/// Surface for headless runs and tests. Optionally writes the last processed
/// image to a PNG when asked.
#[derive(Debug, Default)]
pub struct HeadlessSurface {
    latest: Option<RgbaImage>,
    preview: Option<RgbaImage>,
    shown: u64,
    previews: u64,
    cleared: u64,
    status: String,
    snapshot_path: Option<PathBuf>,
}

impl HeadlessSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot_path(path: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn latest(&self) -> Option<&RgbaImage> {
        self.latest.as_ref()
    }

    /// Number of images shown so far
    pub fn shown(&self) -> u64 {
        self.shown
    }

    /// Last raw camera frame; visible whenever no processed image is
    pub fn preview(&self) -> Option<&RgbaImage> {
        self.preview.as_ref()
    }

    pub fn previews(&self) -> u64 {
        self.previews
    }

    pub fn cleared(&self) -> u64 {
        self.cleared
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    /// Write the latest image to the snapshot path. Returns false if either is missing.
    pub fn save_snapshot(&self) -> Result<bool, DisplayError> {
        let (Some(path), Some(image)) = (self.snapshot_path.as_ref(), self.latest.as_ref()) else {
            return Ok(false);
        };
        image.save(path)?;
        info!("Saved snapshot to {}", path.display());
        Ok(true)
    }
}

impl DisplaySurface for HeadlessSurface {
    fn show(&mut self, image: &RgbaImage) -> Result<(), DisplayError> {
        self.latest = Some(image.clone());
        self.shown += 1;
        Ok(())
    }

    fn show_preview(&mut self, image: &RgbaImage) -> Result<(), DisplayError> {
        self.preview = Some(image.clone());
        self.previews += 1;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), DisplayError> {
        self.latest = None;
        self.cleared += 1;
        Ok(())
    }

    fn set_status(&mut self, status: &str) {
        if self.status != status {
            debug!(status, "status changed");
            self.status = status.to_owned();
        }
    }
}
