//! Per-output render targets.
//!
//! GL outputs render into a GPU surface and keep two cursor buffer objects
//! in rotation; Pixman outputs render into a ping-ponged pair of dumb
//! buffers.

use crate::core::device::{BoId, BoUsage, BufferDevice, GpuSurfaceId};
use crate::core::errors::CoreError;
use crate::core::format;
use crate::core::framebuffer::{FbId, FbKind, FramebufferRegistry};
use crate::prelude::*;
use crate::util::logging;
use crate::wlog;

#[derive(Debug)]
pub enum RenderTargets {
    Gl {
        surface: GpuSurfaceId,
        /// Format the surface was created with
        format: u32,
        /// `None` when cursor buffers could not be allocated
        cursors: Option<[FbId; 2]>,
        current_cursor: usize,
    },
    Pixman {
        dumb: [FbId; 2],
        current_image: usize,
        previous_damage: Region,
    },
}

impl RenderTargets {
    /// Create the GPU surface, falling back to the alpha variant of the
    /// format, then the cursor buffers. Returns whether the cursor buffers
    /// exist.
    pub fn init_gl(
        device: &mut dyn BufferDevice,
        registry: &mut FramebufferRegistry,
        width: u32,
        height: u32,
        gbm_format: u32,
        cursor_size: (u32, u32),
    ) -> Result<(Self, bool)> {
        let (surface, format) = match device.create_surface(width, height, gbm_format) {
            Ok(surface) => (surface, gbm_format),
            Err(err) => {
                let Some(fallback) = format::fallback_format_for(gbm_format) else {
                    tracing::error!("failed to create GPU surface: {}", err);
                    return Err(err);
                };
                tracing::warn!("GPU surface creation failed ({}), retrying with 0x{:08x}", err, fallback);
                (device.create_surface(width, height, fallback)?, fallback)
            }
        };

        let cursors = init_cursors(device, registry, cursor_size);
        let cursors_ok = cursors.is_some();
        Ok((Self::Gl { surface, format, cursors, current_cursor: 0 }, cursors_ok))
    }

    /// Allocate the dumb-buffer pair covering `output_rect`
    pub fn init_pixman(
        device: &mut dyn BufferDevice,
        registry: &mut FramebufferRegistry,
        output_rect: Rect,
        gbm_format: u32,
    ) -> Result<Self> {
        if gbm_format != format::XRGB8888 && gbm_format != format::RGB565 {
            return Err(CoreError::unsupported(format!("unsupported pixman format 0x{:x}", gbm_format)));
        }

        let (width, height) = (output_rect.width as u32, output_rect.height as u32);
        let first = registry.create_dumb(device, width, height, gbm_format)?;
        let second = match registry.create_dumb(device, width, height, gbm_format) {
            Ok(id) => id,
            Err(err) => {
                registry.unref(device, first);
                return Err(err);
            }
        };

        Ok(Self::Pixman {
            dumb: [first, second],
            current_image: 0,
            previous_damage: Region::from_rect(output_rect),
        })
    }

    pub fn is_gl(&self) -> bool {
        matches!(self, Self::Gl { .. })
    }

    /// Advance the cursor rotation and return the buffer object to write
    pub fn next_cursor_bo(&mut self, registry: &FramebufferRegistry) -> Option<BoId> {
        let Self::Gl { cursors: Some(cursors), current_cursor, .. } = self else {
            return None;
        };
        *current_cursor ^= 1;
        registry.get(cursors[*current_cursor]).and_then(|fb| fb.bo)
    }

    /// Release everything; the caller has already dropped `fb_current`.
    pub fn fini(self, device: &mut dyn BufferDevice, registry: &mut FramebufferRegistry) {
        match self {
            Self::Gl { surface, cursors, .. } => {
                if let Some(cursors) = cursors {
                    fini_cursors(device, registry, cursors);
                }
                device.destroy_surface(surface);
            }
            Self::Pixman { dumb, .. } => {
                for id in dumb {
                    registry.unref(device, id);
                }
            }
        }
    }
}

fn init_cursors(
    device: &mut dyn BufferDevice,
    registry: &mut FramebufferRegistry,
    (width, height): (u32, u32),
) -> Option<[FbId; 2]> {
    let mut created = Vec::with_capacity(2);
    for _ in 0..2 {
        let wrapped = match device.create_bo(width, height, format::ARGB8888, BoUsage::Cursor) {
            Ok(bo) => registry
                .get_from_bo(&*device, bo, format::ARGB8888, FbKind::Cursor, None, None)
                .map_err(|err| {
                    device.destroy_bo(bo);
                    err
                }),
            Err(err) => Err(err),
        };
        match wrapped {
            Ok(id) => created.push(id),
            Err(err) => {
                wlog!(logging::OUTPUT, "Cursor buffers unavailable ({}), using GL cursors", err);
                for id in created {
                    registry.unref(device, id);
                }
                return None;
            }
        }
    }
    Some([created[0], created[1]])
}

fn fini_cursors(device: &mut dyn BufferDevice, registry: &mut FramebufferRegistry, cursors: [FbId; 2]) {
    for id in cursors {
        registry.unref(device, id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::device::VirtualGpu;

    #[test]
    fn test_gl_targets_round_trip() {
        let gpu = VirtualGpu::new();
        let mut device = gpu.clone();
        let mut registry = FramebufferRegistry::new();

        let (targets, cursors_ok) =
            RenderTargets::init_gl(&mut device, &mut registry, 640, 480, format::XRGB8888, (64, 64)).unwrap();
        assert!(cursors_ok);
        assert_eq!(registry.len(), 2);

        targets.fini(&mut device, &mut registry);
        assert!(registry.is_empty());
        assert_eq!(gpu.live_bos(), 0);
    }

    #[test]
    fn test_cursor_allocation_failure_is_not_fatal() {
        let gpu = VirtualGpu::new();
        let mut device = gpu.clone();
        let mut registry = FramebufferRegistry::new();

        // the second cursor buffer fails; the first is released again
        gpu.limit_cursor_bos(1);
        let (targets, cursors_ok) =
            RenderTargets::init_gl(&mut device, &mut registry, 64, 64, format::XRGB8888, (64, 64)).unwrap();
        assert!(!cursors_ok);
        assert!(targets.is_gl());
        assert!(registry.is_empty());
        // only the surface ring is left
        assert_eq!(gpu.live_bos(), 3);

        targets.fini(&mut device, &mut registry);
        assert_eq!(gpu.live_bos(), 0);
    }

    #[test]
    fn test_cursor_rotation_alternates() {
        let mut device = VirtualGpu::new();
        let mut registry = FramebufferRegistry::new();
        let (mut targets, _) =
            RenderTargets::init_gl(&mut device, &mut registry, 64, 64, format::XRGB8888, (32, 32)).unwrap();

        let a = targets.next_cursor_bo(&registry).unwrap();
        let b = targets.next_cursor_bo(&registry).unwrap();
        assert_ne!(a, b);
        assert_eq!(targets.next_cursor_bo(&registry), Some(a));
        targets.fini(&mut device, &mut registry);
    }

    #[test]
    fn test_pixman_rejects_unsupported_format() {
        let mut device = VirtualGpu::new();
        let mut registry = FramebufferRegistry::new();
        let err = RenderTargets::init_pixman(&mut device, &mut registry, Rect::from_size(64, 64), format::XRGB2101010)
            .unwrap_err();
        assert!(matches!(err, CoreError::Unsupported(_)));
    }

    #[test]
    fn test_pixman_second_dumb_failure_rolls_back() {
        let gpu = VirtualGpu::new();
        let mut device = gpu.clone();
        let mut registry = FramebufferRegistry::new();

        gpu.limit_dumb_buffers(1);
        assert!(
            RenderTargets::init_pixman(&mut device, &mut registry, Rect::from_size(32, 32), format::RGB565).is_err()
        );
        assert_eq!(gpu.live_dumbs(), 0);
        assert!(registry.is_empty());
    }
}
