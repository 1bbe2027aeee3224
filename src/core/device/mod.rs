//! Device contracts.
//!
//! Two seams separate the backend from the hardware:
//! - [`HwcDevice`]: the hardware composer (displays, layers, present, vsync)
//! - [`BufferDevice`]: the DRM node the scanout buffers come from (GPU buffer
//!   objects and surfaces, dumb buffers, kernel framebuffers)
//!
//! Both are resolved once when the backend is built and called through trait
//! objects afterwards. [`VirtualHwc`] and [`VirtualGpu`] implement them in
//! memory for headless runs and tests.

use std::os::unix::io::{OwnedFd, RawFd};

use crate::core::format::FormatInfo;
use crate::core::surface::DmaBufData;
use crate::prelude::*;

pub mod fence;
pub mod virtual_gpu;
pub mod virtual_hwc;

pub use fence::ReleaseFence;
pub use virtual_gpu::VirtualGpu;
pub use virtual_hwc::{FenceMode, VirtualConfig, VirtualHwc};

/// Hardware composer display index
pub type DisplayId = u32;
/// Hardware composer layer identifier; only valid within one composition cycle
pub type LayerId = u64;
/// Hardware composer display configuration identifier
pub type ConfigId = u32;

/// GPU buffer object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BoId(pub u64);

/// GPU surface (a small pool of buffer objects a renderer cycles through)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpuSurfaceId(pub u64);

/// Attributes queryable per display configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigAttribute {
    Width,
    Height,
    RefreshRate,
    DpiX,
    DpiY,
}

/// Usage hint for a composition layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayerUsage {
    #[default]
    Normal,
    Cursor,
}

/// What a layer scans out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerBuffer {
    /// A GPU buffer object
    Bo(BoId),
    /// A kernel framebuffer (dumb buffers)
    Framebuffer(u32),
}

/// Called by the device on every vsync, possibly from a driver thread.
/// Arguments are the display and the vsync timestamp in nanoseconds.
pub type VsyncCallback = Box<dyn FnMut(DisplayId, i64) + Send>;

/// Hardware composition device.
pub trait HwcDevice {
    fn num_displays(&self) -> Result<u32>;

    fn display_name(&self, display: DisplayId) -> Result<String>;

    fn display_configs(&self, display: DisplayId) -> Result<Vec<ConfigId>>;

    fn display_info(&self, display: DisplayId, config: ConfigId, attribute: ConfigAttribute) -> Result<i32>;

    fn active_config(&self, display: DisplayId) -> Result<ConfigId>;

    fn set_active_config(&mut self, display: DisplayId, config: ConfigId) -> Result<()>;

    fn set_gamma(&mut self, display: DisplayId, red: f32, green: f32, blue: f32) -> Result<()>;

    /// Drop every layer of the display; previously returned layer ids become invalid.
    fn clear_all_layers(&mut self, display: DisplayId) -> Result<()>;

    fn create_layer(&mut self, display: DisplayId) -> Result<LayerId>;

    fn layer_set_buffer(&mut self, display: DisplayId, layer: LayerId, buffer: LayerBuffer) -> Result<()>;

    /// `None` means the buffer is ready to be read immediately.
    fn layer_set_acquire_fence(&mut self, display: DisplayId, layer: LayerId, fence: Option<OwnedFd>) -> Result<()>;

    fn layer_set_source_crop(&mut self, display: DisplayId, layer: LayerId, crop: Rect) -> Result<()>;

    fn layer_set_display_frame(&mut self, display: DisplayId, layer: LayerId, frame: Rect) -> Result<()>;

    fn layer_set_surface_damage(&mut self, display: DisplayId, layer: LayerId, damage: &[Rect]) -> Result<()>;

    fn layer_set_usage(&mut self, display: DisplayId, layer: LayerId, usage: LayerUsage) -> Result<()>;

    /// Present the current layer set. The returned fence signals once the
    /// hardware stopped reading the previously displayed buffers.
    fn present_display(&mut self, display: DisplayId) -> Result<Option<ReleaseFence>>;

    /// Install the vsync callback for a display, replacing any previous one.
    fn register_vsync_callback(&mut self, display: DisplayId, callback: VsyncCallback) -> Result<()>;
}

/// Usage of a freshly created buffer object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoUsage {
    /// Scanout + rendering
    Scanout,
    /// Small CPU-written buffer for the cursor layer
    Cursor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoInfo {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: u32,
    /// Kernel GEM handle
    pub handle: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumbBuffer {
    pub handle: u32,
    pub pitch: u32,
    pub size: u64,
}

/// Where a dumb buffer can be mmap'd from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumbMapInfo {
    pub fd: RawFd,
    pub offset: i64,
}

/// Buffer allocation on the DRM node backing the outputs.
pub trait BufferDevice {
    /// Whether GPU buffer objects and surfaces can be created
    fn has_gpu(&self) -> bool;

    fn create_bo(&mut self, width: u32, height: u32, format: u32, usage: BoUsage) -> Result<BoId>;

    fn bo_info(&self, bo: BoId) -> Result<BoInfo>;

    /// Upload `data` (tightly packed at the BO stride) into the buffer object
    fn write_bo(&mut self, bo: BoId, data: &[u8]) -> Result<()>;

    fn read_bo(&self, bo: BoId) -> Result<Vec<u8>>;

    fn destroy_bo(&mut self, bo: BoId);

    /// Import a client dma-buf as a buffer object
    fn import_dmabuf(&mut self, buffer: &DmaBufData) -> Result<BoId>;

    fn create_surface(&mut self, width: u32, height: u32, format: u32) -> Result<GpuSurfaceId>;

    fn destroy_surface(&mut self, surface: GpuSurfaceId);

    /// Give a software renderer CPU access to the surface's back buffer.
    /// Hardware drivers draw through their own API and may return `Unsupported`.
    fn surface_draw(&mut self, surface: GpuSurfaceId, draw: &mut dyn FnMut(&mut [u8], u32)) -> Result<()>;

    /// Lock the most recently drawn buffer of the surface for scanout
    fn lock_front_buffer(&mut self, surface: GpuSurfaceId) -> Result<BoId>;

    /// Return a locked buffer to the surface's pool
    fn release_buffer(&mut self, surface: GpuSurfaceId, bo: BoId);

    fn create_dumb(&mut self, width: u32, height: u32, bpp: u32) -> Result<DumbBuffer>;

    fn map_dumb(&mut self, handle: u32) -> Result<DumbMapInfo>;

    fn destroy_dumb(&mut self, handle: u32);

    fn add_framebuffer(&mut self, width: u32, height: u32, format: &FormatInfo, handle: u32, pitch: u32) -> Result<u32>;

    fn remove_framebuffer(&mut self, fb_id: u32);
}
