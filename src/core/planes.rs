//! Plane assignment.
//!
//! Every cycle the output's layers are rebuilt from scratch. Views are walked
//! front to back; a view lands on the cursor plane when the hardware can show
//! it there unchanged, on the primary plane (composited by the renderer)
//! otherwise. A full-screen dma-buf with nothing above it is scanned out
//! directly.

use wayland_protocols::wp::presentation_time::server::wp_presentation_feedback::Kind;
use wayland_server::protocol::{wl_output, wl_shm};

use crate::config::RendererKind;
use crate::core::backend::{find_output, Backend};
use crate::core::device::{BufferDevice, HwcDevice, LayerBuffer, LayerId, LayerUsage};
use crate::core::errors::CoreError;
use crate::core::framebuffer::FramebufferRegistry;
use crate::core::output::{Output, OutputId, RenderTargets};
use crate::core::repaint::PendingState;
use crate::core::surface::View;
use crate::prelude::*;
use crate::util::logging;
use crate::wlog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plane {
    Primary,
    Cursor,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaneAssignment {
    pub surface_id: u32,
    pub plane: Plane,
    /// Presentation feedback flags for the surface's frame
    pub feedback: Kind,
    /// The view's buffer contents must stay available after the commit
    pub keep_buffer: bool,
}

impl Backend {
    /// Assign each view of `views` (front to back) to a plane and program
    /// the output's layers for this cycle.
    pub fn assign_planes(&mut self, state: &PendingState, id: OutputId, views: &[View]) -> Result<Vec<PlaneAssignment>> {
        self.check_pending(state)?;
        let pixman = self.renderer == RendererKind::Pixman;
        let cursors_are_broken = self.cursors_are_broken;
        let cursor_size = self.config.cursor_size();

        let output = find_output(&mut self.outputs, id)?;
        if !output.enabled {
            return Err(CoreError::NotEnabled(id));
        }

        output.reset_planes();
        if let Err(e) = self.hwc.clear_all_layers(output.display) {
            tracing::warn!("clear_all_layers on {} failed: {}", output.name, e);
        }

        let mut overlap = Region::new();
        let mut assignments = Vec::with_capacity(views.len());

        for view in views {
            let keep_buffer = pixman || keeps_buffer(view, cursor_size);
            let mut feedback = Kind::empty();

            let plane = if overlap.intersects_rect(&view.bounding_box) {
                Plane::Primary
            } else if try_direct_scanout(self.gpu.as_mut(), &mut self.registry, output, view) {
                feedback = Kind::ZeroCopy;
                Plane::Primary
            } else if !cursors_are_broken
                && !pixman
                && cursor_candidate(output, view, cursor_size)
                && place_cursor(self.hwc.as_mut(), self.gpu.as_mut(), &self.registry, output, view, cursor_size)
            {
                Plane::Cursor
            } else {
                Plane::Primary
            };

            if plane == Plane::Primary {
                ensure_primary_layer(self.hwc.as_mut(), output)?;
                overlap.union_rect(view.bounding_box);
            }

            tracing::trace!("surface {} -> {:?} on {}", view.surface_id, plane, output.name);
            assignments.push(PlaneAssignment { surface_id: view.surface_id, plane, feedback, keep_buffer });
        }

        Ok(assignments)
    }
}

/// Whether the client must keep the buffer around after it was consumed.
/// SHM buffers too large for the cursor plane are copied into the
/// composition anyway and can be released.
fn keeps_buffer(view: &View, (cursor_width, cursor_height): (u32, u32)) -> bool {
    let Some(buffer) = &view.buffer else {
        return false;
    };
    match buffer.shm() {
        None => true,
        Some(shm) => shm.width as u32 <= cursor_width && shm.height as u32 <= cursor_height,
    }
}

/// Create the primary layer on first use, covering the whole mode
pub(crate) fn ensure_primary_layer(hwc: &mut dyn HwcDevice, output: &mut Output) -> Result<LayerId> {
    if let Some(layer) = output.primary_layer {
        return Ok(layer);
    }
    let layer = hwc.create_layer(output.display)?;
    let viewport = output.viewport();
    hwc.layer_set_source_crop(output.display, layer, viewport)?;
    hwc.layer_set_display_frame(output.display, layer, viewport)?;
    hwc.layer_set_surface_damage(output.display, layer, &[viewport])?;
    output.primary_layer = Some(layer);
    Ok(layer)
}

// ============================================================================
// Direct scanout
// ============================================================================

fn try_direct_scanout(
    device: &mut dyn BufferDevice,
    registry: &mut FramebufferRegistry,
    output: &mut Output,
    view: &View,
) -> bool {
    if output.disable_planes
        || output.fb_pending.is_some()
        || !device.has_gpu()
        || output.transform != wl_output::Transform::Normal
        || view.buffer_scale != output.scale
        || view.bounding_box != output.rect()
    {
        return false;
    }
    let Some(buffer) = &view.buffer else {
        return false;
    };
    // scanout is unscaled: the buffer must cover the mode exactly
    if buffer.dmabuf().is_none() || buffer.buffer_type.size() != Some(output.size()) {
        return false;
    }

    match registry.import_client_buffer(device, buffer.clone()) {
        Ok(fb) => {
            output.fb_pending = Some(fb);
            tracing::debug!("surface {} scanned out directly on {}", view.surface_id, output.name);
            true
        }
        Err(e) => {
            tracing::debug!("direct scanout of surface {} not possible: {}", view.surface_id, e);
            false
        }
    }
}

// ============================================================================
// Cursor plane
// ============================================================================

fn cursor_candidate(output: &Output, view: &View, (cursor_width, cursor_height): (u32, u32)) -> bool {
    if output.cursor_view.is_some() || output.disable_planes {
        return false;
    }
    if !matches!(output.targets, Some(RenderTargets::Gl { cursors: Some(_), .. })) {
        return false;
    }
    if !view.visible_only_on(output.id)
        || output.transform != wl_output::Transform::Normal
        || !view.transform_is_translation
        || view.buffer_scale != output.scale
        || view.scissor_enabled
    {
        return false;
    }
    let Some(shm) = view.buffer.as_ref().and_then(|buffer| buffer.shm()) else {
        return false;
    };
    shm.format == wl_shm::Format::Argb8888
        && shm.width as u32 <= cursor_width
        && shm.height as u32 <= cursor_height
}

/// Put `view` on the cursor plane. Returns false if the layer could not be
/// set up, in which case the view is composited instead.
fn place_cursor(
    hwc: &mut dyn HwcDevice,
    gpu: &mut dyn BufferDevice,
    registry: &FramebufferRegistry,
    output: &mut Output,
    view: &View,
    cursor_size: (u32, u32),
) -> bool {
    match program_cursor_layer(hwc, gpu, registry, output, view, cursor_size) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("cursor plane unavailable on {}: {}", output.name, e);
            false
        }
    }
}

fn program_cursor_layer(
    hwc: &mut dyn HwcDevice,
    gpu: &mut dyn BufferDevice,
    registry: &FramebufferRegistry,
    output: &mut Output,
    view: &View,
    (cursor_width, cursor_height): (u32, u32),
) -> Result<()> {
    let Some(shm) = view.buffer.as_ref().and_then(|buffer| buffer.shm()) else {
        return Err(CoreError::unsupported("cursor view without shm buffer"));
    };
    let display = output.display;

    let layer = match output.cursor_layer {
        Some(layer) => layer,
        None => {
            let layer = hwc.create_layer(display)?;
            hwc.layer_set_usage(display, layer, LayerUsage::Cursor)?;
            output.cursor_layer = Some(layer);
            layer
        }
    };

    let Some(bo) = output.targets.as_mut().and_then(|targets| targets.next_cursor_bo(registry)) else {
        return Err(CoreError::unsupported("no cursor buffers"));
    };

    let stride = gpu.bo_info(bo).map(|info| info.stride).unwrap_or(cursor_width * 4) as usize;
    let mut staging = vec![0u8; stride * cursor_height as usize];
    let row_len = shm.width as usize * 4;
    for y in 0..shm.height {
        if let Some(row) = shm.row(y, 4) {
            let start = y as usize * stride;
            staging[start..start + row_len].copy_from_slice(row);
        }
    }
    if let Err(e) = gpu.write_bo(bo, &staging) {
        wlog!(logging::PLANES, "failed to update cursor buffer: {}", e);
    }

    let (x, y) = (view.x() - output.x, view.y() - output.y);
    let crop = Rect::from_size(shm.width, shm.height);
    hwc.layer_set_buffer(display, layer, LayerBuffer::Bo(bo))?;
    hwc.layer_set_source_crop(display, layer, crop)?;
    hwc.layer_set_display_frame(display, layer, Rect::new(x, y, shm.width, shm.height))?;
    hwc.layer_set_surface_damage(display, layer, &[crop])?;

    output.cursor_view = Some(view.surface_id);
    output.cursor_plane_pos = Some((x, y));
    Ok(())
}
