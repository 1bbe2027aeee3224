//! Renderer contract.
//!
//! The repaint pipeline hands the renderer either a GPU surface (GL outputs)
//! or the mapped pixels of a dumb buffer (Pixman outputs). Rendering is
//! synchronous: once `repaint_output` returns the target holds the frame.

use crate::core::device::{BufferDevice, GpuSurfaceId};
use crate::core::format::FormatInfo;
use crate::core::output::Output;
use crate::prelude::*;

pub mod software;

pub use software::SoftwareRenderer;

pub enum RenderTarget<'a> {
    Gpu {
        surface: GpuSurfaceId,
        format: &'static FormatInfo,
        device: &'a mut dyn BufferDevice,
    },
    Cpu {
        pixels: &'a mut [u8],
        stride: u32,
        width: u32,
        height: u32,
        format: &'static FormatInfo,
    },
}

impl std::fmt::Debug for RenderTarget<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gpu { surface, format, .. } => {
                f.debug_struct("Gpu").field("surface", surface).field("format", &format.name).finish()
            }
            Self::Cpu { stride, width, height, format, .. } => f
                .debug_struct("Cpu")
                .field("width", width)
                .field("height", height)
                .field("stride", stride)
                .field("format", &format.name)
                .finish(),
        }
    }
}

pub trait Renderer {
    /// Draw `damage` (global coordinates) of `output` into `target`
    fn repaint_output(&mut self, output: &Output, target: RenderTarget<'_>, damage: &Region) -> Result<()>;
}
