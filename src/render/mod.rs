/*
 *  render/mod.rs
 *
 *  ArtSync - artwork worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  Render sinks - where decoded artwork ends up
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

pub mod traits;
pub mod error;
pub mod framebuffer;
pub mod file;
pub mod frame;

// Mock sink for testing
#[cfg(test)]
pub mod mock;

pub use error::RenderFault;
pub use traits::{BoxedSink, RenderSink};
pub use framebuffer::{FramebufferSink, PixelFormat};
pub use file::FileSink;
pub use frame::{checkerboard, fit_to_panel};

use crate::config::{RenderSettings, SinkKind};

/// Open the sink named by the configuration.
pub fn open_sink(settings: &RenderSettings) -> Result<BoxedSink, RenderFault> {
    let sink: BoxedSink = match settings.sink {
        SinkKind::Framebuffer => Box::new(FramebufferSink::open(
            &settings.device,
            settings.width,
            settings.height,
            settings.pixel_format,
            settings.stride,
        )?),
        SinkKind::File => Box::new(FileSink::new(&settings.file_path, settings.width, settings.height)),
    };
    Ok(sink)
}
