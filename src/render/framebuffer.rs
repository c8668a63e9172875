/*
 *  render/framebuffer.rs
 *
 *  ArtSync - artwork worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  Linux framebuffer sink (/dev/fbN), panel already brought up
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use log::{debug, info};
use memmap2::{MmapMut, MmapOptions};
use serde::{Deserialize, Serialize};

use crate::decode::ImageBuffer;
use crate::render::error::RenderFault;
use crate::render::frame::fit_to_panel;
use crate::render::traits::RenderSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 16 bpp, 5-6-5, little endian
    #[default]
    Rgb565,
    /// 32 bpp, B G R X in memory
    Xrgb8888,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb565 => 2,
            PixelFormat::Xrgb8888 => 4,
        }
    }
}

/// Pack an RGBA frame into `out`, row by row with `stride` bytes per line.
///
/// The frame must already be panel sized.
pub fn pack_frame(pixels: &ImageBuffer, format: PixelFormat, stride: usize, out: &mut [u8]) -> Result<(), RenderFault> {
    let (width, height) = pixels.dimensions();
    let bpp = format.bytes_per_pixel();
    let row_bytes = width as usize * bpp;
    if stride < row_bytes {
        return Err(RenderFault::Geometry { expected: row_bytes, actual: stride });
    }
    let needed = stride * height as usize;
    if out.len() < needed {
        return Err(RenderFault::Geometry { expected: needed, actual: out.len() });
    }

    for (y, row) in pixels.rows().enumerate() {
        let line = &mut out[y * stride..y * stride + row_bytes];
        for (px, dst) in row.zip(line.chunks_exact_mut(bpp)) {
            let [r, g, b, _] = px.0;
            match format {
                PixelFormat::Rgb565 => {
                    let v: u16 = ((r as u16 & 0xF8) << 8) | ((g as u16 & 0xFC) << 3) | (b as u16 >> 3);
                    dst.copy_from_slice(&v.to_le_bytes());
                }
                PixelFormat::Xrgb8888 => dst.copy_from_slice(&[b, g, r, 0xFF]),
            }
        }
    }
    Ok(())
}

pub struct FramebufferSink {
    device: PathBuf,
    map: MmapMut,
    width: u32,
    height: u32,
    format: PixelFormat,
    stride: usize,
}

impl FramebufferSink {
    /// Map the framebuffer device; `stride` defaults to a packed line.
    pub fn open(device: &Path, width: u32, height: u32, format: PixelFormat, stride: Option<u32>) -> Result<Self, RenderFault> {
        let stride = stride.map(|s| s as usize).unwrap_or(width as usize * format.bytes_per_pixel());
        let needed = stride * height as usize;

        let file = OpenOptions::new().read(true).write(true).open(device)?;
        let available = file.metadata()?.len() as usize;
        // character devices report 0, only sanity check regular files
        if available != 0 && available < needed {
            return Err(RenderFault::Geometry { expected: needed, actual: available });
        }
        let map = unsafe { MmapOptions::new().len(needed).map_mut(&file)? };

        info!("Framebuffer {} mapped: {}x{} {:?} stride {}", device.display(), width, height, format, stride);
        Ok(FramebufferSink {
            device: device.to_path_buf(),
            map,
            width,
            height,
            format,
            stride,
        })
    }
}

impl RenderSink for FramebufferSink {
    fn render(&mut self, pixels: &ImageBuffer) -> Result<(), RenderFault> {
        let frame = fit_to_panel(pixels, self.width, self.height);
        pack_frame(&frame, self.format, self.stride, &mut self.map[..])?;
        self.map.flush()?;
        debug!("Framebuffer {} updated ({}x{})", self.device.display(), pixels.width(), pixels.height());
        Ok(())
    }

    fn describe(&self) -> String {
        format!("framebuffer {} {}x{} {:?}", self.device.display(), self.width, self.height, self.format)
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        Some((self.width, self.height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_pack_rgb565() {
        let img = ImageBuffer::from_pixel(2, 1, Rgba([255, 0, 0, 255]));
        let mut out = vec![0u8; 4];
        pack_frame(&img, PixelFormat::Rgb565, 4, &mut out).unwrap();
        assert_eq!(out, vec![0x00, 0xF8, 0x00, 0xF8]);
    }

    #[test]
    fn test_pack_xrgb_with_padded_stride() {
        let img = ImageBuffer::from_pixel(1, 2, Rgba([1, 2, 3, 255]));
        let mut out = vec![0u8; 16];
        pack_frame(&img, PixelFormat::Xrgb8888, 8, &mut out).unwrap();
        assert_eq!(&out[0..4], &[3, 2, 1, 0xFF]);
        assert_eq!(&out[4..8], &[0, 0, 0, 0]);
        assert_eq!(&out[8..12], &[3, 2, 1, 0xFF]);
    }

    #[test]
    fn test_pack_rejects_short_buffer() {
        let img = ImageBuffer::from_pixel(4, 4, Rgba([0, 0, 0, 255]));
        let mut out = vec![0u8; 10];
        assert!(matches!(
            pack_frame(&img, PixelFormat::Rgb565, 8, &mut out),
            Err(RenderFault::Geometry { expected: 32, actual: 10 })
        ));
    }

    #[test]
    fn test_render_into_mapped_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        file.as_file().set_len(8 * 4 * 2).unwrap();

        let mut sink = FramebufferSink::open(file.path(), 8, 4, PixelFormat::Rgb565, None).unwrap();
        let img = ImageBuffer::from_pixel(8, 4, Rgba([255, 255, 255, 255]));
        sink.render(&img).unwrap();
        drop(sink);

        let bytes = std::fs::read(file.path()).unwrap();
        assert!(bytes.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_open_rejects_small_device_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        file.as_file().set_len(16).unwrap();
        assert!(FramebufferSink::open(file.path(), 320, 960, PixelFormat::Rgb565, None).is_err());
    }
}
