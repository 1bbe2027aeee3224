//! In-memory hardware composer.
//!
//! Records every layer programmed by the backend and every present, and lets
//! the owner fire vsync from any thread. Used by the headless binary and by
//! the tests.

use std::collections::BTreeMap;
use std::os::unix::io::OwnedFd;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{
    ConfigAttribute, ConfigId, DisplayId, HwcDevice, LayerBuffer, LayerId, LayerUsage, ReleaseFence,
    VsyncCallback,
};
use crate::core::errors::CoreError;
use crate::prelude::*;

/// One display configuration as the device reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualConfig {
    pub id: ConfigId,
    pub width: i32,
    pub height: i32,
    /// mHz
    pub refresh: i32,
    pub dpi_x: i32,
    pub dpi_y: i32,
}

impl VirtualConfig {
    pub fn new(id: ConfigId, width: i32, height: i32, refresh: i32) -> Self {
        Self { id, width, height, refresh, dpi_x: 96, dpi_y: 96 }
    }
}

/// What `present_display` hands back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FenceMode {
    /// No release fence
    None,
    /// An already signaled fence
    #[default]
    Signaled,
    /// A fence that never signals (exercises the bounded wait)
    Unsignaled,
}

/// Layer state as last programmed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerRecord {
    pub buffer: Option<LayerBuffer>,
    pub has_acquire_fence: bool,
    pub source_crop: Rect,
    pub display_frame: Rect,
    pub damage: Vec<Rect>,
    pub usage: LayerUsage,
}

/// Snapshot of the layer set taken at each present
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentRecord {
    pub display: DisplayId,
    pub layers: Vec<(LayerId, LayerRecord)>,
}

#[derive(Debug)]
struct DisplayState {
    name: String,
    configs: Vec<VirtualConfig>,
    active: ConfigId,
    gamma: Option<(f32, f32, f32)>,
    layers: BTreeMap<LayerId, LayerRecord>,
    next_layer: LayerId,
    clears: u64,
}

#[derive(Debug, Default)]
struct HwcInner {
    displays: Vec<DisplayState>,
    presents: Vec<PresentRecord>,
    fence_mode: FenceMode,
    fail_present: bool,
    fail_gamma: bool,
}

/// Cloneable handle; all clones share one device.
#[derive(Clone, Default)]
pub struct VirtualHwc {
    inner: Arc<Mutex<HwcInner>>,
    vsync: Arc<Mutex<HashMap<DisplayId, VsyncCallback>>>,
}

impl std::fmt::Debug for VirtualHwc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualHwc").field("inner", &self.inner).finish_non_exhaustive()
    }
}

impl VirtualHwc {
    /// A device with a single display exposing `configs`; the first one is active.
    pub fn new(name: &str, configs: Vec<VirtualConfig>) -> Self {
        let hwc = Self::default();
        hwc.add_display(name, configs);
        hwc
    }

    pub fn add_display(&self, name: &str, configs: Vec<VirtualConfig>) -> DisplayId {
        let mut inner = self.inner();
        let active = configs.first().map(|c| c.id).unwrap_or_default();
        inner.displays.push(DisplayState {
            name: name.to_string(),
            configs,
            active,
            gamma: None,
            layers: BTreeMap::new(),
            next_layer: 1,
            clears: 0,
        });
        (inner.displays.len() - 1) as DisplayId
    }

    fn inner(&self) -> MutexGuard<'_, HwcInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_fence_mode(&self, mode: FenceMode) {
        self.inner().fence_mode = mode;
    }

    pub fn set_fail_present(&self, fail: bool) {
        self.inner().fail_present = fail;
    }

    pub fn set_fail_gamma(&self, fail: bool) {
        self.inner().fail_gamma = fail;
    }

    /// Deliver a vsync event the way a driver thread would.
    /// Returns false if no callback is registered for the display.
    pub fn fire_vsync(&self, display: DisplayId, timestamp_ns: i64) -> bool {
        let mut callbacks = self.vsync.lock().unwrap_or_else(PoisonError::into_inner);
        match callbacks.get_mut(&display) {
            Some(callback) => {
                callback(display, timestamp_ns);
                true
            }
            None => false,
        }
    }

    pub fn has_vsync_callback(&self, display: DisplayId) -> bool {
        self.vsync.lock().unwrap_or_else(PoisonError::into_inner).contains_key(&display)
    }

    pub fn presents(&self) -> Vec<PresentRecord> {
        self.inner().presents.clone()
    }

    pub fn present_count(&self) -> usize {
        self.inner().presents.len()
    }

    /// Layers currently programmed on the display
    pub fn layers(&self, display: DisplayId) -> Vec<(LayerId, LayerRecord)> {
        self.inner()
            .displays
            .get(display as usize)
            .map(|d| d.layers.iter().map(|(id, l)| (*id, l.clone())).collect())
            .unwrap_or_default()
    }

    pub fn clear_count(&self, display: DisplayId) -> u64 {
        self.inner().displays.get(display as usize).map(|d| d.clears).unwrap_or(0)
    }

    pub fn gamma(&self, display: DisplayId) -> Option<(f32, f32, f32)> {
        self.inner().displays.get(display as usize).and_then(|d| d.gamma)
    }
}

impl HwcInner {
    fn display(&self, display: DisplayId) -> Result<&DisplayState> {
        self.displays
            .get(display as usize)
            .ok_or(CoreError::hardware("display", libc::EINVAL))
    }

    fn display_mut(&mut self, display: DisplayId) -> Result<&mut DisplayState> {
        self.displays
            .get_mut(display as usize)
            .ok_or(CoreError::hardware("display", libc::EINVAL))
    }

    fn layer_mut(&mut self, display: DisplayId, layer: LayerId) -> Result<&mut LayerRecord> {
        self.display_mut(display)?
            .layers
            .get_mut(&layer)
            .ok_or(CoreError::hardware("layer", libc::EINVAL))
    }
}

impl HwcDevice for VirtualHwc {
    fn num_displays(&self) -> Result<u32> {
        Ok(self.inner().displays.len() as u32)
    }

    fn display_name(&self, display: DisplayId) -> Result<String> {
        Ok(self.inner().display(display)?.name.clone())
    }

    fn display_configs(&self, display: DisplayId) -> Result<Vec<ConfigId>> {
        Ok(self.inner().display(display)?.configs.iter().map(|c| c.id).collect())
    }

    fn display_info(&self, display: DisplayId, config: ConfigId, attribute: ConfigAttribute) -> Result<i32> {
        let inner = self.inner();
        let config = inner
            .display(display)?
            .configs
            .iter()
            .find(|c| c.id == config)
            .ok_or(CoreError::hardware("get_display_info", libc::EINVAL))?;
        Ok(match attribute {
            ConfigAttribute::Width => config.width,
            ConfigAttribute::Height => config.height,
            ConfigAttribute::RefreshRate => config.refresh,
            ConfigAttribute::DpiX => config.dpi_x,
            ConfigAttribute::DpiY => config.dpi_y,
        })
    }

    fn active_config(&self, display: DisplayId) -> Result<ConfigId> {
        Ok(self.inner().display(display)?.active)
    }

    fn set_active_config(&mut self, display: DisplayId, config: ConfigId) -> Result<()> {
        let mut inner = self.inner();
        let state = inner.display_mut(display)?;
        if !state.configs.iter().any(|c| c.id == config) {
            return Err(CoreError::hardware("set_display_config", libc::EINVAL));
        }
        state.active = config;
        Ok(())
    }

    fn set_gamma(&mut self, display: DisplayId, red: f32, green: f32, blue: f32) -> Result<()> {
        let mut inner = self.inner();
        if inner.fail_gamma {
            return Err(CoreError::hardware("set_display_gamma", libc::EIO));
        }
        inner.display_mut(display)?.gamma = Some((red, green, blue));
        Ok(())
    }

    fn clear_all_layers(&mut self, display: DisplayId) -> Result<()> {
        let mut inner = self.inner();
        let state = inner.display_mut(display)?;
        state.layers.clear();
        state.clears += 1;
        Ok(())
    }

    fn create_layer(&mut self, display: DisplayId) -> Result<LayerId> {
        let mut inner = self.inner();
        let state = inner.display_mut(display)?;
        let id = state.next_layer;
        state.next_layer += 1;
        state.layers.insert(id, LayerRecord::default());
        Ok(id)
    }

    fn layer_set_buffer(&mut self, display: DisplayId, layer: LayerId, buffer: LayerBuffer) -> Result<()> {
        self.inner().layer_mut(display, layer)?.buffer = Some(buffer);
        Ok(())
    }

    fn layer_set_acquire_fence(&mut self, display: DisplayId, layer: LayerId, fence: Option<OwnedFd>) -> Result<()> {
        // the fence is consumed; dropping it closes the fd
        self.inner().layer_mut(display, layer)?.has_acquire_fence = fence.is_some();
        Ok(())
    }

    fn layer_set_source_crop(&mut self, display: DisplayId, layer: LayerId, crop: Rect) -> Result<()> {
        self.inner().layer_mut(display, layer)?.source_crop = crop;
        Ok(())
    }

    fn layer_set_display_frame(&mut self, display: DisplayId, layer: LayerId, frame: Rect) -> Result<()> {
        self.inner().layer_mut(display, layer)?.display_frame = frame;
        Ok(())
    }

    fn layer_set_surface_damage(&mut self, display: DisplayId, layer: LayerId, damage: &[Rect]) -> Result<()> {
        self.inner().layer_mut(display, layer)?.damage = damage.to_vec();
        Ok(())
    }

    fn layer_set_usage(&mut self, display: DisplayId, layer: LayerId, usage: LayerUsage) -> Result<()> {
        self.inner().layer_mut(display, layer)?.usage = usage;
        Ok(())
    }

    fn present_display(&mut self, display: DisplayId) -> Result<Option<ReleaseFence>> {
        let mut inner = self.inner();
        if inner.fail_present {
            return Err(CoreError::hardware("present_display", libc::EIO));
        }
        let layers = inner.display(display)?.layers.iter().map(|(id, l)| (*id, l.clone())).collect();
        inner.presents.push(PresentRecord { display, layers });

        match inner.fence_mode {
            FenceMode::None => Ok(None),
            FenceMode::Signaled => ReleaseFence::signaled().map(Some),
            FenceMode::Unsignaled => ReleaseFence::unsignaled().map(Some),
        }
    }

    fn register_vsync_callback(&mut self, display: DisplayId, callback: VsyncCallback) -> Result<()> {
        self.inner().display(display)?;
        self.vsync
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(display, callback);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    fn device() -> VirtualHwc {
        VirtualHwc::new(
            "virtual-0",
            vec![VirtualConfig::new(0, 1920, 1080, 60000), VirtualConfig::new(1, 1280, 720, 60000)],
        )
    }

    #[test]
    fn test_display_info() {
        let hwc = device();
        assert_eq!(hwc.num_displays().unwrap(), 1);
        assert_eq!(hwc.display_configs(0).unwrap(), vec![0, 1]);
        assert_eq!(hwc.display_info(0, 1, ConfigAttribute::Width).unwrap(), 1280);
        assert!(hwc.display_info(0, 7, ConfigAttribute::Width).is_err());
        assert!(hwc.display_name(3).is_err());
    }

    #[test]
    fn test_clear_invalidates_layers() {
        let mut hwc = device();
        let layer = hwc.create_layer(0).unwrap();
        hwc.layer_set_usage(0, layer, LayerUsage::Cursor).unwrap();
        hwc.clear_all_layers(0).unwrap();
        assert!(hwc.layer_set_usage(0, layer, LayerUsage::Normal).is_err());
        assert_eq!(hwc.clear_count(0), 1);
    }

    #[test]
    fn test_vsync_from_another_thread() {
        let mut hwc = device();
        let seen = Arc::new(AtomicI64::new(0));
        let seen_cb = seen.clone();
        hwc.register_vsync_callback(0, Box::new(move |_, ts| seen_cb.store(ts, Ordering::SeqCst)))
            .unwrap();

        let remote = hwc.clone();
        std::thread::spawn(move || remote.fire_vsync(0, 16_666_667))
            .join()
            .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 16_666_667);
        assert!(!hwc.fire_vsync(1, 0));
    }
}
