//! Output lifecycle: enable, disable, destroy, mode switch, gamma and
//! backlight.
//!
//! Disable and destroy cannot run while a present is waiting for its vsync;
//! they are recorded as pending and retried from `finish_frame`.

use calloop::LoopHandle;
use wayland_server::protocol::wl_output;

use crate::config::RendererKind;
use crate::core::backend::{find_output, Backend, HwcState};
use crate::core::device::BufferDevice;
use crate::core::errors::CoreError;
use crate::core::framebuffer::FramebufferRegistry;
use crate::core::notifier::FrameNotifier;
use crate::core::output::backlight;
use crate::core::output::{choose_mode, Mode, Output, OutputId, RenderTargets};
use crate::prelude::*;
use crate::util::logging;
use crate::wlog;

/// Render targets for the output's current mode. The flag is false when the
/// GL cursor buffers could not be allocated.
fn init_targets(
    device: &mut dyn BufferDevice,
    registry: &mut FramebufferRegistry,
    renderer: RendererKind,
    output: &Output,
    cursor_size: (u32, u32),
) -> Result<(RenderTargets, bool)> {
    match renderer {
        RendererKind::Gl => {
            let (width, height) = output.size();
            RenderTargets::init_gl(device, registry, width as u32, height as u32, output.gbm_format, cursor_size)
        }
        RendererKind::Pixman => {
            let targets = RenderTargets::init_pixman(device, registry, output.rect(), output.gbm_format)?;
            Ok((targets, true))
        }
    }
}

impl Backend {
    // ========================================================================
    // Enable / disable / destroy
    // ========================================================================

    /// Bring an output up: render targets, backlight, frame notifier and
    /// vsync callback. The first repaint reprograms everything.
    pub fn enable<D: HwcState + 'static>(&mut self, id: OutputId, handle: &LoopHandle<'static, D>) -> Result<()> {
        let cursor_size = self.config.cursor_size();
        let output = find_output(&mut self.outputs, id)?;
        if output.enabled {
            return Ok(());
        }

        let (targets, cursors_ok) =
            init_targets(self.gpu.as_mut(), &mut self.registry, self.renderer, output, cursor_size)?;
        if !cursors_ok {
            self.cursors_are_broken = true;
        }

        if let Some(device) = output.backlight.as_deref() {
            match backlight::normalized(device) {
                Ok(value) => output.backlight_current = value,
                Err(e) => tracing::warn!("Failed to read backlight of {}: {}", output.name, e),
            }
        }

        let notifier = match FrameNotifier::register(handle, id) {
            Ok(notifier) => notifier,
            Err(e) => {
                targets.fini(self.gpu.as_mut(), &mut self.registry);
                return Err(e);
            }
        };

        let vsync = notifier.vsync_handle();
        match self.hwc.register_vsync_callback(
            output.display,
            Box::new(move |display, timestamp| {
                vsync.on_vsync(display, timestamp);
            }),
        ) {
            Ok(()) => wlog!(logging::VSYNC, "vsync callback registered for display {}", output.display),
            Err(e) => tracing::warn!("Failed to register vsync callback for {}: {}", output.name, e),
        }

        output.targets = Some(targets);
        output.notifier = Some(notifier);
        output.enabled = true;
        output.state_invalid = true;
        output.damage_all();

        let (width, height) = output.size();
        wlog!(logging::OUTPUT, "Enabled output {} ({}x{}, {:?})", output.name, width, height, self.renderer);
        Ok(())
    }

    /// Take an output down.
    ///
    /// With a frame in flight this only records the request and returns
    /// [`CoreError::DisableDeferred`]; the disable runs when the frame
    /// finishes.
    pub fn disable(&mut self, id: OutputId) -> Result<()> {
        let output = find_output(&mut self.outputs, id)?;
        if output.frame_pending {
            output.disable_pending = true;
            tracing::debug!("disable of {} deferred until its frame completes", output.name);
            return Err(CoreError::DisableDeferred(id));
        }
        if !output.enabled {
            output.disable_pending = false;
            return Ok(());
        }
        self.deinit(id)
    }

    fn deinit(&mut self, id: OutputId) -> Result<()> {
        let output = find_output(&mut self.outputs, id)?;

        // a direct-scanout buffer picked for a cycle that never presented
        if let Some(fb) = output.fb_pending.take() {
            self.registry.unref(self.gpu.as_mut(), fb);
        }
        assert!(output.slots_empty_except_current(), "deinit of {} with fb_last still held", output.name);

        if let Some(fb) = output.fb_current.take() {
            self.registry.unref(self.gpu.as_mut(), fb);
        }
        if let Some(targets) = output.targets.take() {
            targets.fini(self.gpu.as_mut(), &mut self.registry);
        }

        output.reset_planes();
        if let Err(e) = self.hwc.clear_all_layers(output.display) {
            tracing::debug!("clear_all_layers on {} failed: {}", output.name, e);
        }
        if let Err(e) = self.hwc.register_vsync_callback(output.display, Box::new(|_, _| {})) {
            tracing::debug!("failed to unhook vsync of {}: {}", output.name, e);
        }
        output.notifier = None;

        output.enabled = false;
        output.disable_pending = false;
        output.damage.clear();
        wlog!(logging::OUTPUT, "Disabled output {}", output.name);
        Ok(())
    }

    /// Remove an output. With a frame in flight the destroy is deferred and
    /// `Ok` is returned.
    pub fn destroy(&mut self, id: OutputId) -> Result<()> {
        let output = find_output(&mut self.outputs, id)?;
        if output.frame_pending {
            output.destroy_pending = true;
            tracing::debug!("destroy of {} deferred until its frame completes", output.name);
            return Ok(());
        }
        if output.enabled {
            self.deinit(id)?;
        }
        if let Some(output) = self.outputs.remove(&id) {
            wlog!(logging::OUTPUT, "Destroyed output {} ({} modes)", output.name, output.modes.len());
        }
        Ok(())
    }

    // ========================================================================
    // Mode switch
    // ========================================================================

    /// Switch to the catalog entry matching `target`.
    ///
    /// The render targets are rebuilt for the new size. If that fails the
    /// output stays enabled without targets and every repaint reports
    /// nothing to present until the next successful switch.
    pub fn switch_mode(&mut self, id: OutputId, target: &Mode) -> Result<()> {
        let cursor_size = self.config.cursor_size();
        let output = find_output(&mut self.outputs, id)?;

        let index = choose_mode(&output.modes, output.current_mode, target).ok_or(CoreError::NoMatchingMode {
            width: target.width,
            height: target.height,
            refresh: target.refresh,
        })?;
        if index == output.current_mode {
            return Ok(());
        }
        if output.frame_pending || output.fb_pending.is_some() {
            return Err(CoreError::FrameInFlight(id));
        }

        self.hwc.set_active_config(output.display, output.modes[index].config_id)?;

        let previous = output.current_mode;
        output.modes[previous].flags = wl_output::Mode::empty();
        output.modes[index].flags = wl_output::Mode::Current | wl_output::Mode::Preferred;
        output.current_mode = index;

        assert!(output.slots_empty_except_current(), "mode switch of {} with frames still held", output.name);
        if let Some(fb) = output.fb_current.take() {
            self.registry.unref(self.gpu.as_mut(), fb);
        }

        let mode = output.modes[index];
        wlog!(logging::OUTPUT, "{}: switching to {}x{}@{}", output.name, mode.width, mode.height, mode.refresh);

        let Some(old) = output.targets.take() else {
            return Ok(());
        };
        old.fini(self.gpu.as_mut(), &mut self.registry);

        match init_targets(self.gpu.as_mut(), &mut self.registry, self.renderer, output, cursor_size) {
            Ok((targets, cursors_ok)) => {
                self.cursors_are_broken |= !cursors_ok;
                output.targets = Some(targets);
                output.state_invalid = true;
                output.damage_all();
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to recreate render targets for {}: {}", output.name, e);
                Err(e)
            }
        }
    }

    // ========================================================================
    // Gamma & backlight
    // ========================================================================

    /// Program gamma from the first entry of each ramp. Device failures are
    /// logged, not returned.
    pub fn set_gamma(&mut self, id: OutputId, red: &[u16], green: &[u16], blue: &[u16]) -> Result<()> {
        let output = find_output(&mut self.outputs, id)?;
        let (Some(&r), Some(&g), Some(&b)) = (red.first(), green.first(), blue.first()) else {
            return Err(CoreError::unsupported("empty gamma ramp"));
        };
        if let Err(e) = self.hwc.set_gamma(output.display, r as f32, g as f32, b as f32) {
            tracing::warn!("set gamma failed on {}: {}", output.name, e);
        }
        Ok(())
    }

    /// Set the panel brightness from a 0-255 value; larger values are ignored
    pub fn set_backlight(&mut self, id: OutputId, value: u32) -> Result<()> {
        let output = find_output(&mut self.outputs, id)?;
        let Some(device) = output.backlight.as_deref_mut() else {
            tracing::debug!("{} has no backlight", output.name);
            return Ok(());
        };
        if value > 255 {
            return Ok(());
        }
        backlight::set_normalized(device, value)?;
        output.backlight_current = backlight::normalized(device)?;
        Ok(())
    }
}
