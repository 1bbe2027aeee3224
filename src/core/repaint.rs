//! Repaint and present.
//!
//! A repaint cycle is bracketed by [`Backend::repaint_begin`] and
//! [`Backend::repaint_flush`] / [`Backend::repaint_cancel`]. Inside it, each
//! output is given its planes and then repainted: rendered into a fresh
//! framebuffer (unless a client buffer was picked for direct scanout),
//! presented, and its framebuffer slots rotated.
//!
//! Slot life cycle of one frame:
//! - `fb_pending`: rendered or imported, not yet presented
//! - `fb_current`: presented, on screen
//! - `fb_last`: previous `fb_current`, held until the vsync that completes
//!   the next frame (`finish_frame`)

use std::os::unix::io::OwnedFd;
use std::time::Duration;

use wayland_protocols::wp::presentation_time::server::wp_presentation_feedback::Kind;

use crate::core::backend::{find_output, Backend};
use crate::core::device::{BoId, BufferDevice, DisplayId, GpuSurfaceId, HwcDevice, LayerBuffer, LayerId};
use crate::core::errors::CoreError;
use crate::core::format;
use crate::core::framebuffer::{FbId, FbKind, FramebufferRegistry};
use crate::core::notifier::FrameListener;
use crate::core::output::{Output, OutputId, RenderTargets};
use crate::core::planes::ensure_primary_layer;
use crate::core::render::{RenderTarget, Renderer};
use crate::prelude::*;
use crate::util::logging;
use crate::wlog;

/// Token for one open repaint cycle. It owns no buffers.
#[derive(Debug, PartialEq, Eq)]
pub struct PendingState {
    serial: u64,
}

impl PendingState {
    pub fn serial(&self) -> u64 {
        self.serial
    }
}

impl Backend {
    // ========================================================================
    // Repaint cycle
    // ========================================================================

    pub fn repaint_begin(&mut self) -> PendingState {
        if let Some(serial) = self.open_repaint {
            tracing::warn!("repaint cycle {} was never flushed", serial);
        }
        self.repaint_serial += 1;
        self.open_repaint = Some(self.repaint_serial);
        tracing::trace!("repaint cycle {} begins", self.repaint_serial);
        PendingState { serial: self.repaint_serial }
    }

    pub fn repaint_flush(&mut self, state: PendingState) {
        self.close_repaint(state, "flushed");
    }

    pub fn repaint_cancel(&mut self, state: PendingState) {
        self.close_repaint(state, "cancelled");
    }

    pub(crate) fn check_pending(&self, state: &PendingState) -> Result<()> {
        if self.open_repaint != Some(state.serial) {
            return Err(CoreError::StaleRepaintState);
        }
        Ok(())
    }

    fn close_repaint(&mut self, state: PendingState, how: &str) {
        if self.open_repaint == Some(state.serial) {
            self.open_repaint = None;
        } else {
            tracing::debug!("stale repaint state {} {}", state.serial, how);
            return;
        }

        // direct-scanout buffers picked for outputs that did not repaint
        for output in self.outputs.values_mut() {
            if let Some(fb) = output.fb_pending.take() {
                tracing::debug!("dropping unused scanout buffer on {}", output.name);
                self.registry.unref(self.gpu.as_mut(), fb);
            }
        }
        tracing::trace!("repaint cycle {} {}", state.serial, how);
    }

    // ========================================================================
    // Repaint
    // ========================================================================

    /// Render (unless a client buffer is already pending for scanout),
    /// present and rotate the framebuffer slots of one output.
    ///
    /// `damage` is in global coordinates. While the output state is invalid
    /// (after enable, a mode switch or session activation) the output's own
    /// accumulated damage is drawn as well. The rendered area is removed from
    /// `primary_damage`.
    pub fn repaint(
        &mut self,
        state: &PendingState,
        id: OutputId,
        damage: &Region,
        renderer: &mut dyn Renderer,
        primary_damage: &mut Region,
    ) -> Result<()> {
        self.check_pending(state)?;
        let fence_timeout = self.config.fence_timeout();

        let output = find_output(&mut self.outputs, id)?;
        if !output.enabled {
            return Err(CoreError::NotEnabled(id));
        }
        if output.disable_pending || output.destroy_pending {
            return Err(CoreError::OutputBusy(id));
        }
        if output.frame_pending {
            return Err(CoreError::FrameInFlight(id));
        }

        // planes were not assigned for this render; the cursor plane is stale
        if output.disable_planes {
            output.cursor_view = None;
            output.cursor_plane_pos = None;
        }

        let layer = ensure_primary_layer(self.hwc.as_mut(), output)?;
        let display = output.display;

        if output.fb_pending.is_none() {
            let mut render_damage = damage.clone();
            if output.state_invalid {
                render_damage.union(&output.damage);
            }
            let fb = match output.targets {
                Some(RenderTargets::Gl { .. }) => {
                    render_gl(self.gpu.as_mut(), &mut self.registry, output, &render_damage, renderer)?
                }
                Some(RenderTargets::Pixman { .. }) => {
                    render_pixman(self.gpu.as_mut(), &mut self.registry, output, &render_damage, renderer)?
                }
                None => return Err(CoreError::NothingToPresent(id)),
            };
            output.fb_pending = Some(fb);
            primary_damage.subtract(&render_damage);
        }

        let Some(pending) = output.fb_pending else {
            return Err(CoreError::NothingToPresent(id));
        };
        let programmed = match self.registry.get(pending) {
            Some(fb) => program_primary(self.hwc.as_mut(), display, layer, fb.layer_buffer(), None),
            None => Err(CoreError::InvalidFramebuffer(format!("pending framebuffer {:?} vanished", pending))),
        };
        let presented = programmed.and_then(|()| self.hwc.present_display(display));

        let fence = match presented {
            Ok(fence) => fence,
            Err(e) => {
                tracing::error!("present on {} failed, skipping frame: {}", output.name, e);
                if let Some(fb) = output.fb_pending.take() {
                    self.registry.unref(self.gpu.as_mut(), fb);
                }
                return Err(e);
            }
        };

        output.frame_pending = true;
        if let Some(notifier) = &output.notifier {
            notifier.mark_committed();
        }
        output.state_invalid = false;
        output.damage.clear();

        if let Some(fence) = fence {
            if let Err(e) = fence.wait(fence_timeout) {
                tracing::warn!("failed to wait on release fence of {}: {}", output.name, e);
            }
        }

        assert!(output.fb_last.is_none(), "{}: repaint with fb_last still held", output.name);
        output.fb_last = output.fb_current.take();
        output.fb_current = output.fb_pending.take();
        Ok(())
    }

    // ========================================================================
    // Repaint loop & frame completion
    // ========================================================================

    /// Kick off the compositor's repaint loop for an output.
    ///
    /// Without anything on screen the frame is reported finished right
    /// away, without a presentation time. Otherwise the current framebuffer
    /// is held until the next vsync, which finishes the frame.
    pub fn start_repaint_loop(&mut self, id: OutputId, listener: &mut dyn FrameListener) -> Result<()> {
        let output = find_output(&mut self.outputs, id)?;
        if output.disable_pending || output.destroy_pending {
            return Ok(());
        }
        if !output.enabled {
            return Err(CoreError::NotEnabled(id));
        }
        if output.frame_pending {
            return Ok(());
        }

        let Some(current) = output.fb_current else {
            listener.frame_finished(id, None, Kind::empty());
            return Ok(());
        };

        assert!(output.fb_last.is_none(), "{}: repaint loop started with fb_last held", output.name);
        output.fb_last = Some(self.registry.ref_fb(current));
        output.frame_pending = true;
        if let Some(notifier) = &output.notifier {
            notifier.mark_committed();
        }
        Ok(())
    }

    /// Complete the frame in flight: release the previous framebuffer, run
    /// any deferred disable or destroy, then tell the listener.
    pub fn finish_frame(
        &mut self,
        id: OutputId,
        presented_at: Option<Duration>,
        flags: Kind,
        listener: &mut dyn FrameListener,
    ) {
        let Some(output) = self.outputs.get_mut(&id) else {
            tracing::debug!("frame finished for unknown output {}", id);
            return;
        };
        if !output.frame_pending {
            tracing::trace!("spurious frame completion on {}", output.name);
            return;
        }

        if let Some(fb) = output.fb_last.take() {
            self.registry.unref(self.gpu.as_mut(), fb);
        }
        output.frame_pending = false;

        if output.destroy_pending {
            output.destroy_pending = false;
            wlog!(logging::OUTPUT, "running deferred destroy of {}", output.name);
            if let Err(e) = self.destroy(id) {
                tracing::warn!("deferred destroy of output {} failed: {}", id, e);
            }
            return;
        }
        if output.disable_pending {
            wlog!(logging::OUTPUT, "running deferred disable of {}", output.name);
            if let Err(e) = self.disable(id) {
                tracing::warn!("deferred disable of output {} failed: {}", id, e);
            }
        }

        listener.frame_finished(id, presented_at, flags);
    }
}

fn program_primary(
    hwc: &mut dyn HwcDevice,
    display: DisplayId,
    layer: LayerId,
    buffer: LayerBuffer,
    acquire_fence: Option<OwnedFd>,
) -> Result<()> {
    hwc.layer_set_buffer(display, layer, buffer)?;
    // rendering is synchronous, the buffer is complete already
    hwc.layer_set_acquire_fence(display, layer, acquire_fence)
}

/// Draw into the GPU surface and wrap its front buffer
fn render_gl(
    gpu: &mut dyn BufferDevice,
    registry: &mut FramebufferRegistry,
    output: &Output,
    damage: &Region,
    renderer: &mut dyn Renderer,
) -> Result<FbId> {
    let Some(RenderTargets::Gl { surface, format, .. }) = output.targets else {
        return Err(CoreError::NothingToPresent(output.id));
    };
    let info = format::get_info(format).ok_or(CoreError::UnsupportedFormat(format))?;

    renderer.repaint_output(output, RenderTarget::Gpu { surface, format: info, device: &mut *gpu }, damage)?;

    let bo = gpu.lock_front_buffer(surface).map_err(|e| {
        tracing::error!("failed to lock front buffer of {}: {}", output.name, e);
        e
    })?;
    wrap_front_buffer(gpu, registry, surface, bo, format)
}

fn wrap_front_buffer(
    gpu: &mut dyn BufferDevice,
    registry: &mut FramebufferRegistry,
    surface: GpuSurfaceId,
    bo: BoId,
    format: u32,
) -> Result<FbId> {
    match registry.get_from_bo(&*gpu, bo, format, FbKind::GpuSurface, Some(surface), None) {
        Ok(fb) => Ok(fb),
        Err(e) => {
            tracing::error!("failed to get framebuffer for front buffer: {}", e);
            gpu.release_buffer(surface, bo);
            Err(e)
        }
    }
}

/// Draw into the back image of the dumb-buffer pair, then flip the pair.
/// The pair only flips once the renderer succeeded.
fn render_pixman(
    gpu: &mut dyn BufferDevice,
    registry: &mut FramebufferRegistry,
    output: &mut Output,
    damage: &Region,
    renderer: &mut dyn Renderer,
) -> Result<FbId> {
    let (next, fb, total_damage) = match &output.targets {
        Some(RenderTargets::Pixman { dumb, current_image, previous_damage }) => {
            let next = current_image ^ 1;
            // the image being drawn missed what was drawn into the other one
            let mut total = damage.clone();
            total.union(previous_damage);
            (next, dumb[next], total)
        }
        _ => return Err(CoreError::NothingToPresent(output.id)),
    };

    registry.map(gpu, fb)?;
    let Some(framebuffer) = registry.get_mut(fb) else {
        return Err(CoreError::InvalidFramebuffer(format!("dumb buffer {:?} vanished", fb)));
    };
    let (stride, width, height, info) =
        (framebuffer.stride, framebuffer.width, framebuffer.height, framebuffer.format);
    let Some(pixels) = framebuffer.pixels_mut() else {
        return Err(CoreError::InvalidFramebuffer(format!("dumb buffer {:?} is not mapped", fb)));
    };

    let target = RenderTarget::Cpu { pixels, stride, width, height, format: info };
    renderer.repaint_output(output, target, &total_damage)?;

    if let Some(RenderTargets::Pixman { current_image, previous_damage, .. }) = output.targets.as_mut() {
        *current_image = next;
        *previous_damage = damage.clone();
    }
    Ok(registry.ref_fb(fb))
}
