//! Standardized logging utility for the hardware-composer backend.
//!
//! This module provides the `wlog!` macro, which forwards lifecycle messages
//! to `tracing` under a fixed module target so they can be filtered with
//! `RUST_LOG=HWC=debug` and friends.

#[macro_export]
macro_rules! wlog {
    ($module:expr, $($arg:tt)*) => {{
        tracing::info!(target: $module, $($arg)*);
    }};
}

/// Standardized module identifiers
pub const MAIN: &str = "MAIN";
pub const HWC: &str = "HWC";
pub const BACKEND: &str = "BACKEND";
pub const OUTPUT: &str = "OUTPUT";
pub const BUFFER: &str = "BUFFER";
pub const PLANES: &str = "PLANES";
pub const REPAINT: &str = "REPAINT";
pub const VSYNC: &str = "VSYNC";
