//! Physical outputs.
//!
//! An [`Output`] is one hardware composer display: its mode catalog, the
//! three framebuffer slots of the present cycle, the layers programmed for
//! the current composition cycle and the render targets frames are drawn
//! into. Lifecycle operations that need the devices live in `lifecycle.rs`
//! as methods on the backend.

use wayland_server::protocol::wl_output;

use crate::core::device::{DisplayId, LayerId};
use crate::core::framebuffer::FbId;
use crate::core::notifier::FrameNotifier;
use crate::prelude::*;

pub mod backlight;
pub mod lifecycle;
pub mod mode;
pub mod targets;

pub use backlight::{Backlight, SysfsBacklight};
pub use mode::{choose_mode, Mode};
pub use targets::RenderTargets;

pub type OutputId = u32;

#[derive(Debug)]
pub struct Output {
    pub id: OutputId,
    /// Hardware composer display index
    pub display: DisplayId,

    pub name: String,
    pub make: String,
    pub model: String,
    pub serial_number: String,
    pub subpixel: wl_output::Subpixel,
    pub connection_internal: bool,
    pub mm_width: i32,
    pub mm_height: i32,

    pub modes: Vec<Mode>,
    pub current_mode: usize,

    /// Position in the global compositor space
    pub x: i32,
    pub y: i32,
    pub transform: wl_output::Transform,
    pub scale: i32,
    /// Scanout pixel format (fourcc)
    pub gbm_format: u32,

    pub enabled: bool,
    pub disable_pending: bool,
    pub destroy_pending: bool,
    /// Next repaint must reprogram everything
    pub state_invalid: bool,
    /// A present is out and its vsync has not completed it yet
    pub frame_pending: bool,
    /// Composite everything on the primary plane
    pub disable_planes: bool,

    pub fb_current: Option<FbId>,
    pub fb_last: Option<FbId>,
    pub fb_pending: Option<FbId>,

    /// Layers of the current composition cycle
    pub primary_layer: Option<LayerId>,
    pub cursor_layer: Option<LayerId>,
    /// Surface shown on the cursor plane this cycle
    pub cursor_view: Option<u32>,
    /// Cursor plane position, `None` when not in use
    pub cursor_plane_pos: Option<(i32, i32)>,

    pub targets: Option<RenderTargets>,
    pub backlight: Option<Box<dyn Backlight>>,
    /// Brightness on the 0-255 scale, read at enable
    pub backlight_current: u32,
    pub(crate) notifier: Option<FrameNotifier>,

    /// Area that must be redrawn on the next repaint
    pub damage: Region,
}

impl Output {
    pub fn new(id: OutputId, display: DisplayId, name: String) -> Self {
        Self {
            id,
            display,
            name,
            make: "unknown".to_string(),
            model: "unknown".to_string(),
            serial_number: "unknown".to_string(),
            subpixel: wl_output::Subpixel::Unknown,
            connection_internal: true,
            mm_width: 0,
            mm_height: 0,
            modes: Vec::new(),
            current_mode: 0,
            x: 0,
            y: 0,
            transform: wl_output::Transform::Normal,
            scale: 1,
            gbm_format: crate::core::format::XRGB8888,
            enabled: false,
            disable_pending: false,
            destroy_pending: false,
            state_invalid: false,
            frame_pending: false,
            disable_planes: false,
            fb_current: None,
            fb_last: None,
            fb_pending: None,
            primary_layer: None,
            cursor_layer: None,
            cursor_view: None,
            cursor_plane_pos: None,
            targets: None,
            backlight: None,
            backlight_current: 0,
            notifier: None,
            damage: Region::new(),
        }
    }

    pub fn current_mode(&self) -> Option<&Mode> {
        self.modes.get(self.current_mode)
    }

    /// Output size in pixels
    pub fn size(&self) -> (i32, i32) {
        self.current_mode().map(|m| (m.width, m.height)).unwrap_or((0, 0))
    }

    /// Area covered in global coordinates
    pub fn rect(&self) -> Rect {
        let (width, height) = self.size();
        Rect::new(self.x, self.y, width, height)
    }

    /// Full-mode viewport in output coordinates
    pub fn viewport(&self) -> Rect {
        let (width, height) = self.size();
        Rect::from_size(width, height)
    }

    /// Pick the initial mode: the one matching the device's active config
    pub fn choose_initial_mode(&mut self, active_config: u32) -> bool {
        match self.modes.iter().rposition(|m| m.config_id == active_config) {
            Some(index) => {
                self.current_mode = index;
                self.modes[index].flags |= wl_output::Mode::Current;
                true
            }
            None => false,
        }
    }

    /// Physical size from the panel's DPI
    pub fn set_physical_size_from_dpi(&mut self, dpi_x: i32, dpi_y: i32) {
        let (width, height) = self.size();
        self.mm_width = pixels_to_mm(width, dpi_x);
        self.mm_height = pixels_to_mm(height, dpi_y);
    }

    pub fn damage_all(&mut self) {
        self.damage = Region::from_rect(self.rect());
    }

    /// The three framebuffer slots, for teardown checks
    pub fn slots_empty_except_current(&self) -> bool {
        self.fb_last.is_none() && self.fb_pending.is_none()
    }

    /// Drop per-cycle plane state
    pub fn reset_planes(&mut self) {
        self.cursor_view = None;
        self.cursor_plane_pos = None;
        self.primary_layer = None;
        self.cursor_layer = None;
    }
}

fn pixels_to_mm(pixels: i32, dpi: i32) -> i32 {
    if dpi <= 0 {
        return 0;
    }
    (pixels as i64 * 254 / (dpi as i64 * 10)) as i32
}

#[cfg(test)]
mod tests;
