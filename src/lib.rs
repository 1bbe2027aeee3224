// Wawona Compositor
// Copyright (c) 2026
//
// Hardware-composer output backend: owns the physical display, its scanout
// buffers and composition layers, and drives the present/vsync cycle.

pub mod core;
pub mod config;
pub mod util;
pub mod prelude;

pub use crate::config::{BackendConfig, RendererKind};
pub use crate::core::backend::{Backend, HwcState};
pub use crate::core::errors::{CoreError, Result};
pub use crate::core::output::{Mode, Output, OutputId};

#[cfg(test)]
mod tests;
