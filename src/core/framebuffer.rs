//! Framebuffer registry.
//!
//! Every buffer the hardware can scan out is wrapped in a reference-counted
//! [`Framebuffer`]. Slots hold `FbId`s into the registry rather than owning
//! the framebuffer, so one buffer can sit in `fb_current` and `fb_last` at
//! the same time. Backing resources are released when the count reaches
//! zero, once, in the way the framebuffer's kind requires.

use std::os::unix::io::RawFd;
use std::ptr::NonNull;

use crate::core::device::{BoId, BufferDevice, GpuSurfaceId, LayerBuffer};
use crate::core::errors::CoreError;
use crate::core::format::{self, FormatInfo};
use crate::core::surface::{Buffer, BufferType};
use crate::prelude::*;
use crate::util::logging;
use crate::wlog;

/// Handle into the registry. Stale handles (whose framebuffer was released)
/// never alias a newer framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FbId {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FbKind {
    /// CPU-mapped dumb buffer (software rendering)
    Dumb,
    /// Buffer object locked from a GPU surface
    GpuSurface,
    /// Client buffer imported for direct scanout
    Client,
    /// Cursor plane buffer object
    Cursor,
}

/// CPU mapping of a dumb buffer
#[derive(Debug)]
struct CpuMapping {
    ptr: NonNull<u8>,
    len: usize,
}

impl CpuMapping {
    fn new(fd: RawFd, offset: i64, len: usize) -> Result<Self> {
        // SAFETY: we map a fresh shared region of `len` bytes from an fd the
        // device keeps open for as long as the dumb buffer exists
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                offset as libc::off_t,
            )
        };
        if ptr == libc::MAP_FAILED {
            let err = std::io::Error::last_os_error();
            tracing::error!("Failed to mmap dumb buffer (fd={}, size={}): {}", fd, len, err);
            return Err(CoreError::Io(err));
        }
        NonNull::new(ptr as *mut u8)
            .map(|ptr| Self { ptr, len })
            .ok_or_else(|| CoreError::allocation("mmap returned null"))
    }

    fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr/len describe a live mapping owned by self
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: ptr/len describe a live mapping owned by self, and &mut self
        // guarantees exclusive access
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for CpuMapping {
    fn drop(&mut self) {
        // SAFETY: the region was returned by mmap with this length
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len);
        }
    }
}

#[derive(Debug)]
pub struct Framebuffer {
    pub kind: FbKind,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub size: u64,
    pub format: &'static FormatInfo,
    /// Kernel GEM handle
    pub handle: u32,
    /// Kernel framebuffer id, dumb buffers only
    pub fb_id: u32,
    pub bo: Option<BoId>,
    /// Surface the buffer object was locked from
    pub surface: Option<GpuSurfaceId>,
    /// Keeps the client buffer alive while it is scanned out
    pub client_buffer: Option<Arc<Buffer>>,
    mapping: Option<CpuMapping>,
    refcount: u32,
}

impl Framebuffer {
    /// What to hand to a composition layer
    pub fn layer_buffer(&self) -> LayerBuffer {
        match self.bo {
            Some(bo) => LayerBuffer::Bo(bo),
            None => LayerBuffer::Framebuffer(self.fb_id),
        }
    }

    pub fn is_mapped(&self) -> bool {
        self.mapping.is_some()
    }

    pub fn pixels(&self) -> Option<&[u8]> {
        self.mapping.as_ref().map(CpuMapping::as_slice)
    }

    pub fn pixels_mut(&mut self) -> Option<&mut [u8]> {
        self.mapping.as_mut().map(CpuMapping::as_mut_slice)
    }
}

#[derive(Debug, Default)]
struct Entry {
    generation: u32,
    fb: Option<Framebuffer>,
}

#[derive(Debug, Default)]
pub struct FramebufferRegistry {
    entries: Vec<Entry>,
    free: Vec<u32>,
    by_bo: HashMap<BoId, FbId>,
}

impl FramebufferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, fb: Framebuffer) -> FbId {
        let bo = fb.bo;
        let id = match self.free.pop() {
            Some(index) => {
                let entry = &mut self.entries[index as usize];
                entry.fb = Some(fb);
                FbId { index, generation: entry.generation }
            }
            None => {
                self.entries.push(Entry { generation: 0, fb: Some(fb) });
                FbId { index: (self.entries.len() - 1) as u32, generation: 0 }
            }
        };
        if let Some(bo) = bo {
            self.by_bo.insert(bo, id);
        }
        id
    }

    pub fn get(&self, id: FbId) -> Option<&Framebuffer> {
        self.entries
            .get(id.index as usize)
            .filter(|entry| entry.generation == id.generation)
            .and_then(|entry| entry.fb.as_ref())
    }

    pub fn get_mut(&mut self, id: FbId) -> Option<&mut Framebuffer> {
        self.entries
            .get_mut(id.index as usize)
            .filter(|entry| entry.generation == id.generation)
            .and_then(|entry| entry.fb.as_mut())
    }

    /// Current count, 0 once released
    pub fn refcount(&self, id: FbId) -> u32 {
        self.get(id).map(|fb| fb.refcount).unwrap_or(0)
    }

    pub fn lookup_bo(&self, bo: BoId) -> Option<FbId> {
        self.by_bo.get(&bo).copied()
    }

    /// Live framebuffers
    pub fn len(&self) -> usize {
        self.entries.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wrap a GPU buffer object. A buffer object that already has a
    /// framebuffer gets that framebuffer back with one more reference.
    pub fn get_from_bo(
        &mut self,
        device: &dyn BufferDevice,
        bo: BoId,
        format: u32,
        kind: FbKind,
        surface: Option<GpuSurfaceId>,
        client_buffer: Option<Arc<Buffer>>,
    ) -> Result<FbId> {
        if let Some(id) = self.lookup_bo(bo) {
            let fb = self
                .get_mut(id)
                .ok_or_else(|| CoreError::InvalidFramebuffer(format!("stale entry for {:?}", bo)))?;
            assert_eq!(fb.kind, kind, "buffer object {:?} re-wrapped as a different kind", bo);
            fb.refcount += 1;
            return Ok(id);
        }

        let info = format::get_info(format).ok_or(CoreError::UnsupportedFormat(format))?;
        let bo_info = device.bo_info(bo)?;
        let id = self.insert(Framebuffer {
            kind,
            width: bo_info.width,
            height: bo_info.height,
            stride: bo_info.stride,
            size: bo_info.stride as u64 * bo_info.height as u64,
            format: info,
            handle: bo_info.handle,
            fb_id: 0,
            bo: Some(bo),
            surface,
            client_buffer,
            mapping: None,
            refcount: 1,
        });
        tracing::trace!("framebuffer {:?} wraps {:?} ({:?})", id, bo, kind);
        Ok(id)
    }

    /// Import a client buffer for direct scanout. Only dma-bufs can be
    /// scanned out; the framebuffer keeps the client buffer alive.
    pub fn import_client_buffer(&mut self, device: &mut dyn BufferDevice, buffer: Arc<Buffer>) -> Result<FbId> {
        let BufferType::DmaBuf(dmabuf) = &buffer.buffer_type else {
            return Err(CoreError::unsupported(format!("buffer {} is not a dma-buf", buffer.id)));
        };
        let format = dmabuf.format;
        let bo = device.import_dmabuf(dmabuf)?;
        match self.get_from_bo(device, bo, format, FbKind::Client, None, Some(buffer)) {
            Ok(id) => Ok(id),
            Err(err) => {
                device.destroy_bo(bo);
                Err(err)
            }
        }
    }

    /// Allocate a CPU-mapped dumb buffer with a kernel framebuffer.
    /// Nothing is leaked if a later step fails.
    pub fn create_dumb(&mut self, device: &mut dyn BufferDevice, width: u32, height: u32, format: u32) -> Result<FbId> {
        let info = format::get_info(format).ok_or(CoreError::UnsupportedFormat(format))?;
        if !info.is_dumb_compatible() {
            return Err(CoreError::UnsupportedFormat(format));
        }

        let dumb = device.create_dumb(width, height, info.bpp)?;
        let fb_id = match device.add_framebuffer(width, height, info, dumb.handle, dumb.pitch) {
            Ok(fb_id) => fb_id,
            Err(err) => {
                device.destroy_dumb(dumb.handle);
                return Err(err);
            }
        };
        let mapping = device
            .map_dumb(dumb.handle)
            .and_then(|map| CpuMapping::new(map.fd, map.offset, dumb.size as usize));
        let mapping = match mapping {
            Ok(mapping) => mapping,
            Err(err) => {
                device.remove_framebuffer(fb_id);
                device.destroy_dumb(dumb.handle);
                return Err(err);
            }
        };

        let id = self.insert(Framebuffer {
            kind: FbKind::Dumb,
            width,
            height,
            stride: dumb.pitch,
            size: dumb.size,
            format: info,
            handle: dumb.handle,
            fb_id,
            bo: None,
            surface: None,
            client_buffer: None,
            mapping: Some(mapping),
            refcount: 1,
        });
        wlog!(logging::BUFFER, "Created dumb framebuffer {} ({}x{} {})", fb_id, width, height, info.name);
        Ok(id)
    }

    /// Take another reference
    pub fn ref_fb(&mut self, id: FbId) -> FbId {
        match self.get_mut(id) {
            Some(fb) => fb.refcount += 1,
            None => panic!("ref of released framebuffer {:?}", id),
        }
        id
    }

    /// Drop a reference, releasing the backing resources at zero.
    pub fn unref(&mut self, device: &mut dyn BufferDevice, id: FbId) {
        let Some(fb) = self.get_mut(id) else {
            panic!("unref of released framebuffer {:?}", id);
        };
        assert!(fb.refcount > 0, "framebuffer {:?} refcount underflow", id);
        fb.refcount -= 1;
        if fb.refcount > 0 {
            return;
        }

        let entry = &mut self.entries[id.index as usize];
        let Some(mut fb) = entry.fb.take() else {
            return;
        };
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(id.index);
        if let Some(bo) = fb.bo {
            self.by_bo.remove(&bo);
        }

        match fb.kind {
            FbKind::Dumb => {
                drop(fb.mapping.take());
                if fb.fb_id != 0 {
                    device.remove_framebuffer(fb.fb_id);
                }
                device.destroy_dumb(fb.handle);
            }
            FbKind::GpuSurface => {
                if let (Some(surface), Some(bo)) = (fb.surface, fb.bo) {
                    device.release_buffer(surface, bo);
                }
            }
            FbKind::Client | FbKind::Cursor => {
                if let Some(bo) = fb.bo {
                    device.destroy_bo(bo);
                }
            }
        }
        tracing::trace!("released framebuffer {:?} ({:?})", id, fb.kind);
    }

    /// Map a dumb framebuffer for CPU access; a no-op if already mapped.
    pub fn map(&mut self, device: &mut dyn BufferDevice, id: FbId) -> Result<()> {
        let fb = self
            .get_mut(id)
            .ok_or_else(|| CoreError::InvalidFramebuffer(format!("{:?}", id)))?;
        if fb.kind != FbKind::Dumb {
            return Err(CoreError::unsupported(format!("{:?} framebuffers cannot be mapped", fb.kind)));
        }
        if fb.mapping.is_none() {
            let map = device.map_dumb(fb.handle)?;
            fb.mapping = Some(CpuMapping::new(map.fd, map.offset, fb.size as usize)?);
        }
        Ok(())
    }

    pub fn unmap(&mut self, id: FbId) {
        if let Some(fb) = self.get_mut(id) {
            fb.mapping = None;
        }
    }
}
