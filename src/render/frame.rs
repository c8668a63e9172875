/*
 *  render/frame.rs
 *
 *  ArtSync - artwork worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  Frame helpers - status pattern and panel fitting
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

use std::borrow::Cow;

use image::imageops::{self, FilterType};
use image::Rgba;

use crate::decode::ImageBuffer;

const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Black/white checkerboard shown while waiting for the first artwork.
pub fn checkerboard(width: u32, height: u32, square: u32) -> ImageBuffer {
    let square = square.max(1);
    ImageBuffer::from_fn(width, height, |x, y| {
        if (x / square + y / square) % 2 == 0 { BLACK } else { WHITE }
    })
}

/// Scale `pixels` to fit a `width` x `height` panel, keeping aspect and
/// centring on black. Already fitting frames are borrowed, not copied.
pub fn fit_to_panel(pixels: &ImageBuffer, width: u32, height: u32) -> Cow<'_, ImageBuffer> {
    let (src_w, src_h) = pixels.dimensions();
    if (src_w, src_h) == (width, height) || src_w == 0 || src_h == 0 {
        return Cow::Borrowed(pixels);
    }

    // largest size that fits, integer math so 320x960 into 320x960 stays exact
    let (fit_w, fit_h) = if (src_w as u64) * (height as u64) > (src_h as u64) * (width as u64) {
        (width, ((src_h as u64 * width as u64) / src_w as u64).max(1) as u32)
    } else {
        (((src_w as u64 * height as u64) / src_h as u64).max(1) as u32, height)
    };

    let scaled = imageops::resize(pixels, fit_w, fit_h, FilterType::Triangle);
    let mut canvas = ImageBuffer::from_pixel(width, height, BLACK);
    let x = ((width - fit_w) / 2) as i64;
    let y = ((height - fit_h) / 2) as i64;
    imageops::overlay(&mut canvas, &scaled, x, y);
    Cow::Owned(canvas)
}
