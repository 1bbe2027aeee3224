//! CPU renderer used by the headless binary and the tests.
//!
//! It has no scene of its own: every damaged pixel is filled with a solid
//! colour, which is enough to tell frames apart in a dumped buffer.

use crate::core::errors::CoreError;
use crate::core::format::{self, FormatInfo};
use crate::core::output::Output;
use crate::core::render::{RenderTarget, Renderer};
use crate::prelude::*;

#[derive(Debug, Clone)]
pub struct SoftwareRenderer {
    /// ARGB8888 fill colour
    pub color: u32,
    frames: u64,
    pixels_drawn: u64,
}

impl SoftwareRenderer {
    pub fn new(color: u32) -> Self {
        Self { color, frames: 0, pixels_drawn: 0 }
    }

    /// Number of `repaint_output` calls that drew something
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn pixels_drawn(&self) -> u64 {
        self.pixels_drawn
    }
}

impl Default for SoftwareRenderer {
    fn default() -> Self {
        Self::new(0xff20_2020)
    }
}

impl Renderer for SoftwareRenderer {
    fn repaint_output(&mut self, output: &Output, target: RenderTarget<'_>, damage: &Region) -> Result<()> {
        let (width, height) = output.size();
        let bounds = Rect::from_size(width, height);
        let local: Vec<Rect> = damage
            .rects()
            .iter()
            .filter_map(|r| Rect::new(r.x - output.x, r.y - output.y, r.width, r.height).intersection(&bounds))
            .collect();

        let color = self.color;
        let mut drawn = 0u64;
        match target {
            RenderTarget::Cpu { pixels, stride, width, height, format } => {
                let bounds = Rect::from_size(width as i32, height as i32);
                for rect in local.iter().filter_map(|r| r.intersection(&bounds)) {
                    drawn += fill_rect(pixels, stride as usize, format, rect, color)?;
                }
            }
            RenderTarget::Gpu { surface, format, device } => {
                let mut result: Result<()> = Ok(());
                device.surface_draw(surface, &mut |pixels, stride| {
                    for rect in &local {
                        match fill_rect(pixels, stride as usize, format, *rect, color) {
                            Ok(count) => drawn += count,
                            Err(e) => result = Err(e),
                        }
                    }
                })?;
                result?;
            }
        }

        self.frames += 1;
        self.pixels_drawn += drawn;
        tracing::trace!("software renderer drew {} pixels on {}", drawn, output.name);
        Ok(())
    }
}

/// Fill `rect` with `color`, converted to `format`. Returns the pixel count.
fn fill_rect(pixels: &mut [u8], stride: usize, format: &FormatInfo, rect: Rect, color: u32) -> Result<u64> {
    let bpp = format.bytes_per_pixel as usize;
    let encoded = encode(format, color)?;
    let row_len = rect.width as usize * bpp;

    for y in rect.y..rect.bottom() {
        let start = y as usize * stride + rect.x as usize * bpp;
        let Some(row) = pixels.get_mut(start..start + row_len) else {
            return Err(CoreError::InvalidFramebuffer(format!("fill of {:?} outside the buffer", rect)));
        };
        for pixel in row.chunks_exact_mut(bpp) {
            pixel.copy_from_slice(&encoded[..bpp]);
        }
    }
    Ok(rect.area() as u64)
}

fn encode(format: &FormatInfo, color: u32) -> Result<[u8; 4]> {
    let (r, g, b) = ((color >> 16) & 0xff, (color >> 8) & 0xff, color & 0xff);
    match format.format {
        format::XRGB8888 | format::ARGB8888 => Ok(color.to_le_bytes()),
        format::XBGR8888 | format::ABGR8888 => Ok((color & 0xff00_0000 | b << 16 | g << 8 | r).to_le_bytes()),
        format::XRGB2101010 | format::ARGB2101010 => {
            let value = 0xc000_0000 | expand10(r) << 20 | expand10(g) << 10 | expand10(b);
            Ok(value.to_le_bytes())
        }
        format::RGB565 => {
            let value = ((r >> 3) << 11 | (g >> 2) << 5 | (b >> 3)) as u16;
            let [lo, hi] = value.to_le_bytes();
            Ok([lo, hi, 0, 0])
        }
        other => Err(CoreError::UnsupportedFormat(other)),
    }
}

fn expand10(channel: u32) -> u32 {
    channel << 2 | channel >> 6
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::output::Mode;

    fn output(width: i32, height: i32) -> Output {
        let mut output = Output::new(0, 0, "HWC-0".to_string());
        output.modes.push(Mode::new(width, height, 60000, 0));
        output.choose_initial_mode(0);
        output
    }

    #[test]
    fn test_fills_damage_only() {
        let output = output(4, 4);
        let mut pixels = vec![0u8; 4 * 4 * 4];
        let mut renderer = SoftwareRenderer::new(0xff11_2233);
        let target = RenderTarget::Cpu {
            pixels: &mut pixels,
            stride: 16,
            width: 4,
            height: 4,
            format: format::get_info(format::XRGB8888).unwrap(),
        };
        renderer.repaint_output(&output, target, &Region::from_rect(Rect::new(1, 1, 2, 1))).unwrap();

        assert_eq!(renderer.frames(), 1);
        assert_eq!(renderer.pixels_drawn(), 2);
        assert_eq!(&pixels[16 + 4..16 + 8], &[0x33, 0x22, 0x11, 0xff]);
        assert_eq!(&pixels[0..4], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_damage_is_clipped_to_output() {
        let mut output = output(2, 2);
        output.x = 10;
        let mut pixels = vec![0u8; 2 * 2 * 2];
        let mut renderer = SoftwareRenderer::new(0xffff_ffff);
        let target = RenderTarget::Cpu {
            pixels: &mut pixels,
            stride: 4,
            width: 2,
            height: 2,
            format: format::get_info(format::RGB565).unwrap(),
        };
        // global damage hanging off the left edge of the output
        renderer.repaint_output(&output, target, &Region::from_rect(Rect::new(5, 0, 6, 1))).unwrap();

        assert_eq!(renderer.pixels_drawn(), 1);
        assert_eq!(&pixels[0..2], &[0xff, 0xff]);
        assert_eq!(&pixels[2..4], &[0, 0]);
    }
}
