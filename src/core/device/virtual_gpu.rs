//! In-memory buffer device.
//!
//! Buffer objects live in plain vectors, GPU surfaces are a ring of three
//! buffer objects, and dumb buffers are memfd-backed so they can really be
//! mmap'd. Counters let tests check that every resource is released once.

use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{BoId, BoInfo, BoUsage, BufferDevice, DumbBuffer, DumbMapInfo, GpuSurfaceId};
use crate::core::errors::CoreError;
use crate::core::format::{self, FormatInfo};
use crate::core::surface::DmaBufData;
use crate::prelude::*;

const SURFACE_SLOTS: usize = 3;

#[derive(Debug)]
struct VirtualBo {
    info: BoInfo,
    data: Vec<u8>,
    usage: Option<BoUsage>,
}

#[derive(Debug)]
struct Slot {
    bo: BoId,
    locked: bool,
}

#[derive(Debug)]
struct VirtualSurface {
    slots: Vec<Slot>,
    /// Slot the next draw lands in, until it is locked
    back: Option<usize>,
}

#[derive(Debug)]
struct VirtualDumb {
    memfd: OwnedFd,
}

/// Running totals of create/destroy calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GpuCounters {
    pub bos_created: u64,
    pub bos_destroyed: u64,
    pub dumbs_created: u64,
    pub dumbs_destroyed: u64,
    pub framebuffers_added: u64,
    pub framebuffers_removed: u64,
    pub buffers_locked: u64,
    pub buffers_released: u64,
}

#[derive(Debug)]
struct GpuInner {
    has_gpu: bool,
    next_id: u64,
    next_handle: u32,
    bos: HashMap<BoId, VirtualBo>,
    surfaces: HashMap<GpuSurfaceId, VirtualSurface>,
    dumbs: HashMap<u32, VirtualDumb>,
    framebuffers: HashMap<u32, u32>,
    fail_bo_allocs: u32,
    /// Remaining cursor buffer allocations before they start failing
    cursor_budget: Option<u32>,
    /// Remaining dumb buffer allocations before they start failing
    dumb_budget: Option<u32>,
    counters: GpuCounters,
}

/// Cloneable handle; all clones share one device.
#[derive(Debug, Clone)]
pub struct VirtualGpu {
    inner: Arc<Mutex<GpuInner>>,
}

impl Default for VirtualGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualGpu {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(GpuInner {
                has_gpu: true,
                next_id: 1,
                next_handle: 1,
                bos: HashMap::new(),
                surfaces: HashMap::new(),
                dumbs: HashMap::new(),
                framebuffers: HashMap::new(),
                fail_bo_allocs: 0,
                cursor_budget: None,
                dumb_budget: None,
                counters: GpuCounters::default(),
            })),
        }
    }

    /// A device with dumb buffers only (no GPU buffer objects)
    pub fn without_gpu() -> Self {
        let gpu = Self::new();
        gpu.inner().has_gpu = false;
        gpu
    }

    fn inner(&self) -> MutexGuard<'_, GpuInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_has_gpu(&self, has_gpu: bool) {
        self.inner().has_gpu = has_gpu;
    }

    /// Make the next `count` buffer object allocations fail
    pub fn fail_next_bo_allocs(&self, count: u32) {
        self.inner().fail_bo_allocs = count;
    }

    /// Let `count` more cursor buffer objects be allocated, then fail
    pub fn limit_cursor_bos(&self, count: u32) {
        self.inner().cursor_budget = Some(count);
    }

    /// Let `count` more dumb buffers be allocated, then fail
    pub fn limit_dumb_buffers(&self, count: u32) {
        self.inner().dumb_budget = Some(count);
    }

    pub fn counters(&self) -> GpuCounters {
        self.inner().counters
    }

    pub fn live_bos(&self) -> usize {
        self.inner().bos.len()
    }

    pub fn live_dumbs(&self) -> usize {
        self.inner().dumbs.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.inner().framebuffers.len()
    }

    /// Number of locked buffers of a surface
    pub fn locked_buffers(&self, surface: GpuSurfaceId) -> usize {
        self.inner()
            .surfaces
            .get(&surface)
            .map(|s| s.slots.iter().filter(|slot| slot.locked).count())
            .unwrap_or(0)
    }
}

impl GpuInner {
    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn next_handle(&mut self) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn alloc_bo(&mut self, width: u32, height: u32, format: u32, usage: Option<BoUsage>) -> Result<BoId> {
        if !self.has_gpu {
            return Err(CoreError::unsupported("no GPU buffer support"));
        }
        if self.fail_bo_allocs > 0 {
            self.fail_bo_allocs -= 1;
            return Err(CoreError::allocation(format!("buffer object {}x{}", width, height)));
        }
        if usage == Some(BoUsage::Cursor) && !take_budget(&mut self.cursor_budget) {
            return Err(CoreError::allocation(format!("cursor buffer object {}x{}", width, height)));
        }
        let info = format::get_info(format).ok_or(CoreError::UnsupportedFormat(format))?;
        let stride = width * info.bytes_per_pixel;
        let id = BoId(self.next_id());
        let handle = self.next_handle();
        self.bos.insert(
            id,
            VirtualBo {
                info: BoInfo { width, height, stride, format, handle },
                data: vec![0; (stride * height) as usize],
                usage,
            },
        );
        self.counters.bos_created += 1;
        Ok(id)
    }

    fn bo(&self, bo: BoId) -> Result<&VirtualBo> {
        self.bos
            .get(&bo)
            .ok_or_else(|| CoreError::InvalidFramebuffer(format!("unknown buffer object {:?}", bo)))
    }
}

/// Consume one unit of an optional allocation budget
fn take_budget(budget: &mut Option<u32>) -> bool {
    match budget {
        None => true,
        Some(0) => false,
        Some(remaining) => {
            *remaining -= 1;
            true
        }
    }
}

impl BufferDevice for VirtualGpu {
    fn has_gpu(&self) -> bool {
        self.inner().has_gpu
    }

    fn create_bo(&mut self, width: u32, height: u32, format: u32, usage: BoUsage) -> Result<BoId> {
        self.inner().alloc_bo(width, height, format, Some(usage))
    }

    fn bo_info(&self, bo: BoId) -> Result<BoInfo> {
        Ok(self.inner().bo(bo)?.info)
    }

    fn write_bo(&mut self, bo: BoId, data: &[u8]) -> Result<()> {
        let mut inner = self.inner();
        let target = inner
            .bos
            .get_mut(&bo)
            .ok_or_else(|| CoreError::InvalidFramebuffer(format!("unknown buffer object {:?}", bo)))?;
        if target.usage != Some(BoUsage::Cursor) {
            return Err(CoreError::unsupported("write to a buffer object without write usage"));
        }
        if data.len() > target.data.len() {
            return Err(CoreError::allocation(format!(
                "write of {} bytes into {} byte buffer object",
                data.len(),
                target.data.len()
            )));
        }
        target.data[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_bo(&self, bo: BoId) -> Result<Vec<u8>> {
        Ok(self.inner().bo(bo)?.data.clone())
    }

    fn destroy_bo(&mut self, bo: BoId) {
        let mut inner = self.inner();
        if inner.bos.remove(&bo).is_some() {
            inner.counters.bos_destroyed += 1;
        } else {
            tracing::warn!("destroy of unknown buffer object {:?}", bo);
        }
    }

    fn import_dmabuf(&mut self, buffer: &DmaBufData) -> Result<BoId> {
        if buffer.planes.is_empty() {
            return Err(CoreError::allocation("dma-buf without planes"));
        }
        self.inner().alloc_bo(buffer.width, buffer.height, buffer.format, None)
    }

    fn create_surface(&mut self, width: u32, height: u32, format: u32) -> Result<GpuSurfaceId> {
        let mut inner = self.inner();
        let mut slots = Vec::with_capacity(SURFACE_SLOTS);
        for _ in 0..SURFACE_SLOTS {
            match inner.alloc_bo(width, height, format, Some(BoUsage::Scanout)) {
                Ok(bo) => slots.push(Slot { bo, locked: false }),
                Err(err) => {
                    for slot in slots {
                        inner.bos.remove(&slot.bo);
                        inner.counters.bos_destroyed += 1;
                    }
                    return Err(err);
                }
            }
        }
        let id = GpuSurfaceId(inner.next_id());
        inner.surfaces.insert(id, VirtualSurface { slots, back: None });
        Ok(id)
    }

    fn destroy_surface(&mut self, surface: GpuSurfaceId) {
        let mut inner = self.inner();
        let Some(removed) = inner.surfaces.remove(&surface) else {
            tracing::warn!("destroy of unknown GPU surface {:?}", surface);
            return;
        };
        for slot in removed.slots {
            if slot.locked {
                tracing::warn!("GPU surface {:?} destroyed with {:?} still locked", surface, slot.bo);
            }
            inner.bos.remove(&slot.bo);
            inner.counters.bos_destroyed += 1;
        }
    }

    fn surface_draw(&mut self, surface: GpuSurfaceId, draw: &mut dyn FnMut(&mut [u8], u32)) -> Result<()> {
        let mut inner = self.inner();
        let inner = &mut *inner;
        let state = inner
            .surfaces
            .get_mut(&surface)
            .ok_or_else(|| CoreError::unsupported(format!("unknown GPU surface {:?}", surface)))?;

        let index = match state.back {
            Some(index) => index,
            None => {
                let index = state
                    .slots
                    .iter()
                    .position(|slot| !slot.locked)
                    .ok_or_else(|| CoreError::allocation("all surface buffers locked"))?;
                state.back = Some(index);
                index
            }
        };
        let bo = inner
            .bos
            .get_mut(&state.slots[index].bo)
            .ok_or_else(|| CoreError::allocation("surface buffer vanished"))?;
        draw(&mut bo.data, bo.info.stride);
        Ok(())
    }

    fn lock_front_buffer(&mut self, surface: GpuSurfaceId) -> Result<BoId> {
        let mut inner = self.inner();
        let state = inner
            .surfaces
            .get_mut(&surface)
            .ok_or_else(|| CoreError::unsupported(format!("unknown GPU surface {:?}", surface)))?;

        let index = match state.back.take() {
            Some(index) => index,
            None => state
                .slots
                .iter()
                .position(|slot| !slot.locked)
                .ok_or_else(|| CoreError::allocation("all surface buffers locked"))?,
        };
        state.slots[index].locked = true;
        let bo = state.slots[index].bo;
        inner.counters.buffers_locked += 1;
        Ok(bo)
    }

    fn release_buffer(&mut self, surface: GpuSurfaceId, bo: BoId) {
        let mut inner = self.inner();
        let released = inner
            .surfaces
            .get_mut(&surface)
            .and_then(|s| s.slots.iter_mut().find(|slot| slot.bo == bo && slot.locked))
            .map(|slot| slot.locked = false)
            .is_some();
        if released {
            inner.counters.buffers_released += 1;
        } else {
            tracing::warn!("release of {:?} which is not locked on {:?}", bo, surface);
        }
    }

    fn create_dumb(&mut self, width: u32, height: u32, bpp: u32) -> Result<DumbBuffer> {
        let mut inner = self.inner();
        if !take_budget(&mut inner.dumb_budget) {
            return Err(CoreError::allocation(format!("dumb buffer {}x{}", width, height)));
        }
        let pitch = width * bpp.div_ceil(8);
        let size = pitch as u64 * height as u64;

        // SAFETY: the name is a valid nul-terminated string
        let fd = unsafe { libc::memfd_create(c"wawona-dumb".as_ptr(), libc::MFD_CLOEXEC) };
        if fd < 0 {
            return Err(CoreError::Io(std::io::Error::last_os_error()));
        }
        // SAFETY: fd was just created and is owned by nobody else
        let memfd = unsafe { OwnedFd::from_raw_fd(fd) };
        // SAFETY: memfd is a valid, open file descriptor
        if unsafe { libc::ftruncate(memfd.as_raw_fd(), size as libc::off_t) } < 0 {
            return Err(CoreError::Io(std::io::Error::last_os_error()));
        }

        let handle = inner.next_handle();
        inner.dumbs.insert(handle, VirtualDumb { memfd });
        inner.counters.dumbs_created += 1;
        Ok(DumbBuffer { handle, pitch, size })
    }

    fn map_dumb(&mut self, handle: u32) -> Result<DumbMapInfo> {
        let inner = self.inner();
        let dumb = inner
            .dumbs
            .get(&handle)
            .ok_or_else(|| CoreError::InvalidFramebuffer(format!("unknown dumb buffer {}", handle)))?;
        Ok(DumbMapInfo { fd: dumb.memfd.as_raw_fd(), offset: 0 })
    }

    fn destroy_dumb(&mut self, handle: u32) {
        let mut inner = self.inner();
        if inner.dumbs.remove(&handle).is_some() {
            inner.counters.dumbs_destroyed += 1;
        } else {
            tracing::warn!("destroy of unknown dumb buffer {}", handle);
        }
    }

    fn add_framebuffer(&mut self, width: u32, height: u32, format: &FormatInfo, handle: u32, pitch: u32) -> Result<u32> {
        let mut inner = self.inner();
        if width == 0 || height == 0 || pitch < width * format.bytes_per_pixel {
            return Err(CoreError::hardware("add_framebuffer", libc::EINVAL));
        }
        let fb_id = inner.next_handle();
        inner.framebuffers.insert(fb_id, handle);
        inner.counters.framebuffers_added += 1;
        Ok(fb_id)
    }

    fn remove_framebuffer(&mut self, fb_id: u32) {
        let mut inner = self.inner();
        if inner.framebuffers.remove(&fb_id).is_some() {
            inner.counters.framebuffers_removed += 1;
        } else {
            tracing::warn!("removal of unknown framebuffer {}", fb_id);
        }
    }
}
