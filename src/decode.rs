/*
 *  decode.rs
 *
 *  ArtSync - artwork worth the squeeze
 *	(c) 2020-26 Stuart Hunter
 *
 *	This program is free software: you can redistribute it and/or modify
 *	it under the terms of the GNU General Public License as published by
 *	the Free Software Foundation, either version 3 of the License, or
 *	(at your option) any later version.
 *
 *	This program is distributed in the hope that it will be useful,
 *	but WITHOUT ANY WARRANTY; without even the implied warranty of
 *	MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *	GNU General Public License for more details.
 *
 *	See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *	Public License.
 *
 */
use log::debug;
use thiserror::Error;

/// Decoded artwork, straight RGBA.
pub type ImageBuffer = image::RgbaImage;

/// Anything under this is an error page or a cut transfer, not artwork.
pub const MIN_PAYLOAD_BYTES: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeFault {
    #[error("payload too small ({len} bytes), transfer truncated")]
    Truncated { len: usize },
    #[error("undecodable image: {0}")]
    Malformed(String),
    #[error("image has empty dimensions")]
    EmptyDimensions,
}

/// Sniff and decode downloaded artwork.
///
/// Short payloads are rejected before the decoder ever sees them.
pub fn decode_artwork(bytes: &[u8], min_payload_bytes: usize) -> Result<ImageBuffer, DecodeFault> {
    if bytes.len() < min_payload_bytes {
        return Err(DecodeFault::Truncated { len: bytes.len() });
    }
    let image = image::load_from_memory(bytes).map_err(|e| DecodeFault::Malformed(e.to_string()))?;
    if image.width() == 0 || image.height() == 0 {
        return Err(DecodeFault::EmptyDimensions);
    }
    let rgba = image.to_rgba8();
    debug!("Decoded artwork {}x{} from {} bytes", rgba.width(), rgba.height(), bytes.len());
    Ok(rgba)
}

#[cfg(test)]
pub(crate) fn encode_bmp(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    use std::io::Cursor;
    let img = image::RgbImage::from_pixel(width, height, image::Rgb(rgb));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Bmp).unwrap();
    out.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_bmp() {
        let bytes = encode_bmp(32, 48, [200, 10, 10]);
        assert!(bytes.len() > MIN_PAYLOAD_BYTES);
        let img = decode_artwork(&bytes, MIN_PAYLOAD_BYTES).unwrap();
        assert_eq!(img.dimensions(), (32, 48));
        assert_eq!(img.get_pixel(0, 0).0, [200, 10, 10, 255]);
    }

    #[test]
    fn test_short_payload_is_truncated() {
        let bytes = vec![0x42u8; 999];
        assert_eq!(decode_artwork(&bytes, MIN_PAYLOAD_BYTES), Err(DecodeFault::Truncated { len: 999 }));
    }

    #[test]
    fn test_cut_off_bmp_is_malformed() {
        let mut bytes = encode_bmp(64, 64, [1, 2, 3]);
        bytes.truncate(bytes.len() / 2);
        assert!(matches!(decode_artwork(&bytes, MIN_PAYLOAD_BYTES), Err(DecodeFault::Malformed(_))));
    }

    #[test]
    fn test_html_error_page_is_malformed() {
        let page = format!("<html><body>{}</body></html>", "x".repeat(2048));
        assert!(matches!(decode_artwork(page.as_bytes(), MIN_PAYLOAD_BYTES), Err(DecodeFault::Malformed(_))));
    }
}
