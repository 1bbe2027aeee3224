//! Core error types

use thiserror::Error;

/// Errors raised by the output backend.
///
/// Lower layers (fence, format lookup, device calls) return these to their
/// immediate caller; nothing is unwound across the vsync callback boundary.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Allocation failed: {0}")]
    Allocation(String),

    #[error("Hardware composer call {op} failed with code {code}")]
    Hardware { op: &'static str, code: i32 },

    #[error("Unsupported pixel format 0x{0:08x}")]
    UnsupportedFormat(u32),

    #[error("Unsupported configuration: {0}")]
    Unsupported(String),

    #[error("Invalid output ID: {0}")]
    InvalidOutputId(u32),

    #[error("Invalid framebuffer: {0}")]
    InvalidFramebuffer(String),

    #[error("No mode matching {width}x{height}@{refresh}")]
    NoMatchingMode { width: i32, height: i32, refresh: i32 },

    #[error("Output {0} is not enabled")]
    NotEnabled(u32),

    #[error("Output {0} is being disabled or destroyed")]
    OutputBusy(u32),

    #[error("Output {0} still has a frame in flight")]
    FrameInFlight(u32),

    #[error("Disabling output {0} deferred until its frame completes")]
    DisableDeferred(u32),

    #[error("Repaint state is not the open repaint cycle")]
    StaleRepaintState,

    #[error("Nothing to present on output {0}")]
    NothingToPresent(u32),

    #[error("Fence wait failed: {0}")]
    Fence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub fn allocation(msg: impl Into<String>) -> Self {
        Self::Allocation(msg.into())
    }

    pub fn hardware(op: &'static str, code: i32) -> Self {
        Self::Hardware { op, code }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn fence(msg: impl Into<String>) -> Self {
        Self::Fence(msg.into())
    }

    /// Errors that abort backend initialization.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::Config(_) | CoreError::Unsupported(_))
    }

    /// Errors that may cost a frame but leave state consistent.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoreError::Hardware { .. } | CoreError::Fence(_) | CoreError::NothingToPresent(_)
        )
    }

    /// The caller asked for something the output lifecycle forbids right now.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            CoreError::NotEnabled(_)
                | CoreError::OutputBusy(_)
                | CoreError::FrameInFlight(_)
                | CoreError::DisableDeferred(_)
                | CoreError::StaleRepaintState
                | CoreError::InvalidOutputId(_)
        )
    }
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
