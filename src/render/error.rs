/*
 *  render/error.rs
 *
 *  ArtSync - artwork worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  Render failure type, the sync core treats every variant alike
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

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderFault {
    /// Device or file I/O failed
    #[error("render I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Panel and mapping sizes disagree
    #[error("geometry mismatch: expected {expected} bytes, device has {actual}")]
    Geometry { expected: usize, actual: usize },

    /// Encoder or device specific failure
    #[error("render device error: {0}")]
    Device(String),
}

impl From<image::ImageError> for RenderFault {
    fn from(err: image::ImageError) -> Self {
        RenderFault::Device(err.to_string())
    }
}
