//! Error types shared across the pipeline

use std::fmt;

use thiserror::Error;

/// Why a camera stream could not be opened or configured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFailureCode {
    PermissionDenied,
    DeviceBusy,
    Hardware,
    SessionConfig,
    Unsupported,
}

impl fmt::Display for OpenFailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::PermissionDenied => "permission denied",
            Self::DeviceBusy => "device busy",
            Self::Hardware => "hardware error",
            Self::SessionConfig => "session configuration failed",
            Self::Unsupported => "unsupported format",
        };
        f.write_str(text)
    }
}

/// Acquisition failure: the device could not be opened or a session not configured.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("camera open failed ({code}): {reason}")]
pub struct OpenFailure {
    pub code: OpenFailureCode,
    pub reason: String,
}

impl OpenFailure {
    pub fn new(code: OpenFailureCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Classify a driver/library message the way camera stacks usually word them.
    pub fn from_message(message: impl Into<String>) -> Self {
        let reason = message.into();
        let lower = reason.to_lowercase();
        let code = if lower.contains("permission") || lower.contains("denied") {
            OpenFailureCode::PermissionDenied
        } else if lower.contains("busy") {
            OpenFailureCode::DeviceBusy
        } else if lower.contains("format") || lower.contains("not supported") {
            OpenFailureCode::Unsupported
        } else {
            OpenFailureCode::Hardware
        };
        Self { code, reason }
    }
}

/// A frame whose plane metadata does not describe its bytes
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MarshalError {
    #[error("frame has {found} planes, expected 3")]
    PlaneCount { found: usize },

    #[error("frame has zero width or height")]
    EmptyFrame,

    #[error("plane {plane} has zero pixel stride")]
    ZeroPixelStride { plane: usize },

    #[error("plane {plane} row stride {row_stride} is shorter than a {row_bytes}-byte row")]
    RowStrideTooSmall {
        plane: usize,
        row_stride: usize,
        row_bytes: usize,
    },

    #[error("plane {plane} strides (row {row_stride}, pixel {pixel_stride}) overflow the address space")]
    StrideOverflow {
        plane: usize,
        row_stride: usize,
        pixel_stride: usize,
    },

    #[error("plane {plane} holds {len} bytes, layout needs {needed}")]
    PlaneTooShort {
        plane: usize,
        needed: usize,
        len: usize,
    },
}

/// Errors from the pipeline controller
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Open(#[from] OpenFailure),

    #[error("failed to spawn pipeline worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("pipeline worker exited without returning its resources")]
    WorkerLost,
}

/// Errors raised by a display surface
#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("display surface error: {0}")]
    Surface(String),

    #[error("failed to write snapshot: {0}")]
    Snapshot(#[from] image::ImageError),
}

/// Errors loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
