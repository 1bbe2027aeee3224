//! Pixel format table.
//!
//! Maps DRM fourcc codes to the metadata needed for scanout allocation.
//! `depth`/`bpp` are only set for formats the legacy dumb-buffer path can
//! express; GPU-only formats leave them at zero.

use wayland_server::protocol::wl_shm;

/// Build a DRM fourcc code from its four characters.
pub const fn fourcc(a: u8, b: u8, c: u8, d: u8) -> u32 {
    (a as u32) | ((b as u32) << 8) | ((c as u32) << 16) | ((d as u32) << 24)
}

pub const XRGB8888: u32 = fourcc(b'X', b'R', b'2', b'4');
pub const ARGB8888: u32 = fourcc(b'A', b'R', b'2', b'4');
pub const XBGR8888: u32 = fourcc(b'X', b'B', b'2', b'4');
pub const ABGR8888: u32 = fourcc(b'A', b'B', b'2', b'4');
pub const RGB565: u32 = fourcc(b'R', b'G', b'1', b'6');
pub const XRGB2101010: u32 = fourcc(b'X', b'R', b'3', b'0');
pub const ARGB2101010: u32 = fourcc(b'A', b'R', b'3', b'0');

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatInfo {
    pub format: u32,
    pub name: &'static str,
    /// Colour depth for legacy framebuffer creation, 0 if not expressible
    pub depth: u32,
    /// Bits per pixel for dumb-buffer allocation, 0 if not expressible
    pub bpp: u32,
    pub bytes_per_pixel: u32,
    pub has_alpha: bool,
}

impl FormatInfo {
    /// Whether a CPU-mapped dumb buffer can be created in this format
    pub fn is_dumb_compatible(&self) -> bool {
        self.depth != 0 && self.bpp != 0
    }
}

static FORMATS: &[FormatInfo] = &[
    FormatInfo { format: XRGB8888, name: "xrgb8888", depth: 24, bpp: 32, bytes_per_pixel: 4, has_alpha: false },
    FormatInfo { format: ARGB8888, name: "argb8888", depth: 32, bpp: 32, bytes_per_pixel: 4, has_alpha: true },
    FormatInfo { format: XBGR8888, name: "xbgr8888", depth: 0, bpp: 0, bytes_per_pixel: 4, has_alpha: false },
    FormatInfo { format: ABGR8888, name: "abgr8888", depth: 0, bpp: 0, bytes_per_pixel: 4, has_alpha: true },
    FormatInfo { format: RGB565, name: "rgb565", depth: 16, bpp: 16, bytes_per_pixel: 2, has_alpha: false },
    FormatInfo { format: XRGB2101010, name: "xrgb2101010", depth: 30, bpp: 32, bytes_per_pixel: 4, has_alpha: false },
    FormatInfo { format: ARGB2101010, name: "argb2101010", depth: 0, bpp: 0, bytes_per_pixel: 4, has_alpha: true },
];

/// Look up a format by fourcc
pub fn get_info(format: u32) -> Option<&'static FormatInfo> {
    FORMATS.iter().find(|info| info.format == format)
}

/// Parse an output format name as accepted in configuration.
///
/// Only the formats an output can be driven with are accepted.
pub fn parse_output_format(name: &str) -> Option<u32> {
    match name {
        "xrgb8888" => Some(XRGB8888),
        "rgb565" => Some(RGB565),
        "xrgb2101010" => Some(XRGB2101010),
        _ => None,
    }
}

/// Alpha-carrying substitute for an opaque format, if the GPU stack lacks
/// the opaque variant.
pub fn fallback_format_for(format: u32) -> Option<u32> {
    match format {
        XRGB8888 => Some(ARGB8888),
        XRGB2101010 => Some(ARGB2101010),
        _ => None,
    }
}

/// Translate a wl_shm format into its DRM fourcc. The two legacy wl_shm
/// codes are not fourccs; every other value is.
pub fn from_shm(format: wl_shm::Format) -> u32 {
    match format {
        wl_shm::Format::Argb8888 => ARGB8888,
        wl_shm::Format::Xrgb8888 => XRGB8888,
        other => u32::from(other),
    }
}
