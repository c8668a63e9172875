/*
 *  render/file.rs
 *
 *  ArtSync - artwork worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  File sink - writes the current frame to an image file
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

use std::path::{Path, PathBuf};

use image::ImageFormat;
use log::debug;

use crate::decode::ImageBuffer;
use crate::render::error::RenderFault;
use crate::render::frame::fit_to_panel;
use crate::render::traits::RenderSink;

/// Headless stand-in for a panel.
///
/// Every frame is written next to the target and renamed over it, a viewer
/// polling the file never catches half a frame.
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
    width: u32,
    height: u32,
    frames: u64,
}

impl FileSink {
    pub fn new(path: &Path, width: u32, height: u32) -> Self {
        FileSink {
            path: path.to_path_buf(),
            width,
            height,
            frames: 0,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".part");
        self.path.with_file_name(name)
    }
}

impl RenderSink for FileSink {
    fn render(&mut self, pixels: &ImageBuffer) -> Result<(), RenderFault> {
        let format = ImageFormat::from_path(&self.path)?;
        let frame = fit_to_panel(pixels, self.width, self.height);
        let tmp = self.temp_path();
        // BMP/JPEG writers want RGB, PNG keeps alpha
        match format {
            ImageFormat::Png => frame.save_with_format(&tmp, format)?,
            _ => image::DynamicImage::ImageRgba8(frame.into_owned()).to_rgb8().save_with_format(&tmp, format)?,
        }
        std::fs::rename(&tmp, &self.path)?;
        self.frames += 1;
        debug!("Frame {} written to {}", self.frames, self.path.display());
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file {} {}x{}", self.path.display(), self.width, self.height)
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        Some((self.width, self.height))
    }
}
