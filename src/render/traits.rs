/*
 *  render/traits.rs
 *
 *  ArtSync - artwork worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  Render sink abstraction
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

use crate::decode::ImageBuffer;
use crate::render::error::RenderFault;

/// Minimal display abstraction - every sink implements this trait
///
/// A sink takes a fully decoded frame and commits it to wherever the picture
/// lives (panel, framebuffer, file). It either shows the whole frame or
/// reports a fault; the caller decides whether to try again.
pub trait RenderSink: Send {
    /// Commit `pixels` to the output
    fn render(&mut self, pixels: &ImageBuffer) -> Result<(), RenderFault>;

    /// Short human readable description for start-up logs
    fn describe(&self) -> String;

    /// Native panel size, if the sink has one
    fn dimensions(&self) -> Option<(u32, u32)> {
        None
    }
}

pub type BoxedSink = Box<dyn RenderSink>;

impl<S: RenderSink + ?Sized> RenderSink for Box<S> {
    fn render(&mut self, pixels: &ImageBuffer) -> Result<(), RenderFault> {
        (**self).render(pixels)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        (**self).dimensions()
    }
}
