use wayland_server::protocol::wl_shm;

use crate::core::format;
use crate::prelude::Arc;

/// CPU-visible client pixels, already copied out of the shm pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShmBufferData {
    pub width: i32,
    pub height: i32,
    pub stride: i32,
    pub format: wl_shm::Format,
    /// Pixel rows, `stride` bytes apart
    pub data: Arc<Vec<u8>>,
}

impl ShmBufferData {
    /// Row `y` of the buffer, trimmed to `width` pixels
    pub fn row(&self, y: i32, bytes_per_pixel: usize) -> Option<&[u8]> {
        if y < 0 || y >= self.height {
            return None;
        }
        let start = y as usize * self.stride as usize;
        let len = self.width as usize * bytes_per_pixel;
        self.data.get(start..start + len)
    }

    pub fn drm_format(&self) -> u32 {
        format::from_shm(self.format)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaBufPlane {
    pub fd: i32,
    pub offset: u32,
    pub stride: u32,
}

/// Client GPU buffer importable as a buffer object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmaBufData {
    pub width: u32,
    pub height: u32,
    /// DRM fourcc
    pub format: u32,
    pub modifier: u64,
    pub planes: Vec<DmaBufPlane>,
}

impl DmaBufData {
    /// Single-plane linear buffer
    pub fn linear(width: u32, height: u32, format: u32, fd: i32, stride: u32) -> Self {
        Self { width, height, format, modifier: 0, planes: vec![DmaBufPlane { fd, offset: 0, stride }] }
    }
}

/// Platform buffer the backend can neither import nor read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeBufferData {
    pub id: u64,
    pub width: i32,
    pub height: i32,
    pub format: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BufferType {
    Shm(ShmBufferData),
    DmaBuf(DmaBufData),
    Native(NativeBufferData),
    #[default]
    None,
}

impl BufferType {
    pub fn size(&self) -> Option<(i32, i32)> {
        match self {
            BufferType::Shm(data) => Some((data.width, data.height)),
            BufferType::DmaBuf(data) => Some((data.width as i32, data.height as i32)),
            BufferType::Native(data) => Some((data.width, data.height)),
            BufferType::None => None,
        }
    }
}

/// A client buffer attached to a view. Shared with the framebuffer that
/// scans it out, which keeps it alive until the frame leaves the screen.
#[derive(Debug, Clone)]
pub struct Buffer {
    pub id: u32,
    pub buffer_type: BufferType,
}

impl Buffer {
    pub fn new(id: u32, buffer_type: BufferType) -> Self {
        Self { id, buffer_type }
    }

    pub fn shm(&self) -> Option<&ShmBufferData> {
        match &self.buffer_type {
            BufferType::Shm(data) => Some(data),
            _ => None,
        }
    }

    pub fn dmabuf(&self) -> Option<&DmaBufData> {
        match &self.buffer_type {
            BufferType::DmaBuf(data) => Some(data),
            _ => None,
        }
    }
}
