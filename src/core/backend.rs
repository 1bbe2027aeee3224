//! Hardware-composer backend.
//!
//! The backend owns the two devices, the framebuffer registry and every
//! output. Its methods are spread over the modules that implement each part
//! of the pipeline:
//! - `output/lifecycle.rs`: enable, disable, destroy, mode switch, gamma, backlight
//! - `planes.rs`: plane assignment
//! - `repaint.rs`: repaint cycle, start of the repaint loop, frame completion

use std::collections::BTreeMap;

use crate::config::{BackendConfig, RendererKind};
use crate::core::device::{BufferDevice, ConfigAttribute, HwcDevice};
use crate::core::errors::CoreError;
use crate::core::framebuffer::FramebufferRegistry;
use crate::core::output::{Mode, Output, OutputId, RenderTargets, SysfsBacklight};
use crate::prelude::*;
use crate::util::logging;
use crate::wlog;

pub use crate::core::notifier::HwcState;

pub struct Backend {
    pub(crate) hwc: Box<dyn HwcDevice>,
    pub(crate) gpu: Box<dyn BufferDevice>,
    pub(crate) registry: FramebufferRegistry,
    pub(crate) outputs: BTreeMap<OutputId, Output>,
    pub(crate) config: BackendConfig,
    pub(crate) renderer: RendererKind,
    /// Scanout format new outputs start with
    pub(crate) gbm_format: u32,
    /// Cursor plane disabled, either because cursor buffers could not be
    /// allocated or by the debug toggle
    pub cursors_are_broken: bool,
    pub(crate) repaint_serial: u64,
    /// Serial of the repaint cycle between begin and flush/cancel
    pub(crate) open_repaint: Option<u64>,
    pub(crate) session_active: bool,
    next_output_id: OutputId,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("renderer", &self.renderer)
            .field("outputs", &self.outputs.keys().collect::<Vec<_>>())
            .field("framebuffers", &self.registry.len())
            .field("cursors_are_broken", &self.cursors_are_broken)
            .finish_non_exhaustive()
    }
}

/// Output lookup that only borrows the output map
pub(crate) fn find_output(outputs: &mut BTreeMap<OutputId, Output>, id: OutputId) -> Result<&mut Output> {
    outputs.get_mut(&id).ok_or(CoreError::InvalidOutputId(id))
}

impl Backend {
    pub fn new(config: BackendConfig, hwc: Box<dyn HwcDevice>, gpu: Box<dyn BufferDevice>) -> Result<Self> {
        config.validate()?;
        let gbm_format = config.output_format()?;

        wlog!(logging::BACKEND, "Initializing hwc backend ({:?} renderer, {})", config.renderer, config.format);

        if config.renderer == RendererKind::Gl && !gpu.has_gpu() {
            return Err(CoreError::unsupported("GL renderer requested but the device has no GPU buffers"));
        }

        Ok(Self {
            hwc,
            gpu,
            registry: FramebufferRegistry::new(),
            outputs: BTreeMap::new(),
            renderer: config.renderer,
            gbm_format,
            config,
            cursors_are_broken: false,
            repaint_serial: 0,
            open_repaint: None,
            session_active: true,
            next_output_id: 0,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn renderer(&self) -> RendererKind {
        self.renderer
    }

    pub fn output(&self, id: OutputId) -> Option<&Output> {
        self.outputs.get(&id)
    }

    pub fn output_mut(&mut self, id: OutputId) -> Option<&mut Output> {
        self.outputs.get_mut(&id)
    }

    pub fn output_ids(&self) -> Vec<OutputId> {
        self.outputs.keys().copied().collect()
    }

    pub fn registry(&self) -> &FramebufferRegistry {
        &self.registry
    }

    // ========================================================================
    // Output discovery
    // ========================================================================

    /// Create an output for the first display of the hardware composer.
    ///
    /// Returns the ids of the outputs created; empty if the device reports
    /// no display.
    pub fn create_outputs(&mut self) -> Result<Vec<OutputId>> {
        let num_displays = self.hwc.num_displays()?;
        if num_displays < 1 {
            tracing::warn!("Unable to find any connected displays");
            return Ok(Vec::new());
        }
        if num_displays > 1 {
            tracing::debug!("{} displays reported, driving display 0 only", num_displays);
        }

        let display = 0;
        let name = self.hwc.display_name(display)?;
        let configs = self.hwc.display_configs(display)?;
        let Some(&first_config) = configs.first() else {
            return Err(CoreError::unsupported(format!("display {} reports no configurations", name)));
        };

        let id = self.next_output_id;
        let mut output = Output::new(id, display, name);
        output.gbm_format = self.gbm_format;

        for config in &configs {
            let width = self.hwc.display_info(display, *config, ConfigAttribute::Width)?;
            let height = self.hwc.display_info(display, *config, ConfigAttribute::Height)?;
            let refresh = self.hwc.display_info(display, *config, ConfigAttribute::RefreshRate)?;
            output.modes.push(Mode::new(width, height, refresh, *config));
        }

        let active = self.hwc.active_config(display)?;
        if !output.choose_initial_mode(active) {
            return Err(CoreError::unsupported(format!("no available modes for {}", output.name)));
        }

        let dpi_x = self.hwc.display_info(display, first_config, ConfigAttribute::DpiX).unwrap_or(0);
        let dpi_y = self.hwc.display_info(display, first_config, ConfigAttribute::DpiY).unwrap_or(0);
        output.set_physical_size_from_dpi(dpi_x, dpi_y);

        if let Some(path) = &self.config.backlight {
            match SysfsBacklight::open(path) {
                Ok(backlight) => output.backlight = Some(Box::new(backlight)),
                Err(e) => tracing::warn!("Failed to initialize backlight: {}", e),
            }
        }

        wlog!(logging::OUTPUT, "Created output {} ({}), {} modes", id, output.name, output.modes.len());
        for mode in &output.modes {
            tracing::debug!("  mode {}x{}@{} (config {})", mode.width, mode.height, mode.refresh, mode.config_id);
        }

        self.outputs.insert(id, output);
        self.next_output_id += 1;
        Ok(vec![id])
    }

    // ========================================================================
    // Session & debug controls
    // ========================================================================

    /// Session (VT) activation changed
    pub fn session_changed(&mut self, active: bool) {
        self.session_active = active;
        if active {
            wlog!(logging::BACKEND, "activating session");
            for output in self.outputs.values_mut() {
                output.state_invalid = true;
                output.damage_all();
            }
        } else {
            wlog!(logging::BACKEND, "deactivating session");
        }
    }

    pub fn session_active(&self) -> bool {
        self.session_active
    }

    /// Debug binding: turn the cursor plane off or back on
    pub fn toggle_cursor_planes(&mut self) {
        self.cursors_are_broken = !self.cursors_are_broken;
        tracing::info!("cursor planes {}", if self.cursors_are_broken { "disabled" } else { "enabled" });
    }

    /// Move every output from dumb buffers to GPU surfaces.
    ///
    /// Outputs whose GL targets cannot be created are left without render
    /// targets; their repaints fail until a mode switch or re-enable.
    pub fn switch_to_gl_renderer(&mut self) -> Result<()> {
        if self.renderer == RendererKind::Gl {
            return Ok(());
        }
        if !self.gpu.has_gpu() {
            tracing::warn!("No GPU buffer support, aborting renderer switch");
            return Err(CoreError::unsupported("GPU buffers unavailable"));
        }

        wlog!(logging::BACKEND, "Switching to GL renderer");
        let cursor_size = self.config.cursor_size();
        for output in self.outputs.values_mut() {
            let Some(old) = output.targets.take() else {
                continue;
            };
            // frames still referencing the dumb buffers keep them alive
            old.fini(self.gpu.as_mut(), &mut self.registry);

            let (width, height) = output.size();
            match RenderTargets::init_gl(
                self.gpu.as_mut(),
                &mut self.registry,
                width as u32,
                height as u32,
                output.gbm_format,
                cursor_size,
            ) {
                Ok((targets, cursors_ok)) => {
                    self.cursors_are_broken |= !cursors_ok;
                    output.targets = Some(targets);
                    output.state_invalid = true;
                    output.damage_all();
                }
                Err(e) => tracing::error!("Failed to init GL state for output {}: {}", output.id, e),
            }
        }
        self.renderer = RendererKind::Gl;
        Ok(())
    }

    /// Tear down every output. Frames still in flight are abandoned.
    pub fn shutdown(&mut self) {
        for id in self.output_ids() {
            if let Some(output) = self.outputs.get_mut(&id) {
                output.disable_pending = false;
                output.destroy_pending = false;
                output.frame_pending = false;
                for fb in [output.fb_last.take(), output.fb_pending.take()].into_iter().flatten() {
                    self.registry.unref(self.gpu.as_mut(), fb);
                }
            }
            if let Err(e) = self.destroy(id) {
                tracing::warn!("Failed to destroy output {}: {}", id, e);
            }
        }
        wlog!(logging::BACKEND, "Backend shut down, {} framebuffers left", self.registry.len());
    }
}
