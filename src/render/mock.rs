/*
 *  render/mock.rs
 *
 *  ArtSync - artwork worth the squeeze
 *  (c) 2020-26 Stuart Hunter
 *
 *  Mock render sink for testing without a panel
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

use std::sync::{Arc, Mutex};

use crate::decode::ImageBuffer;
use crate::render::error::RenderFault;
use crate::render::traits::RenderSink;

/// Records every frame it is handed. Clones share state, so a test can keep
/// one handle while the controller owns the other.
#[derive(Debug, Clone, Default)]
pub struct MockSink {
    state: Arc<Mutex<MockSinkState>>,
}

#[derive(Debug, Default)]
pub struct MockSinkState {
    /// Successful renders
    pub render_count: usize,

    /// Render calls, failed ones included
    pub attempt_count: usize,

    /// Dimensions of the last committed frame
    pub last_dimensions: Option<(u32, u32)>,

    /// Top-left pixel of the last committed frame
    pub last_corner: Option<[u8; 4]>,

    /// Fail the next N render calls
    pub fail_next: usize,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Arc<Mutex<MockSinkState>> {
        Arc::clone(&self.state)
    }

    pub fn fail_next(&self, n: usize) {
        self.state.lock().unwrap().fail_next = n;
    }

    pub fn render_count(&self) -> usize {
        self.state.lock().unwrap().render_count
    }

    pub fn attempt_count(&self) -> usize {
        self.state.lock().unwrap().attempt_count
    }

    pub fn last_corner(&self) -> Option<[u8; 4]> {
        self.state.lock().unwrap().last_corner
    }
}

impl RenderSink for MockSink {
    fn render(&mut self, pixels: &ImageBuffer) -> Result<(), RenderFault> {
        let mut state = self.state.lock().unwrap();
        state.attempt_count += 1;
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(RenderFault::Device("simulated render failure".into()));
        }
        state.render_count += 1;
        state.last_dimensions = Some(pixels.dimensions());
        state.last_corner = pixels.get_pixel_checked(0, 0).map(|p| p.0);
        Ok(())
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_records_frames() {
        let sink = MockSink::new();
        let mut owned = sink.clone();
        owned.render(&ImageBuffer::from_pixel(3, 5, Rgba([7, 7, 7, 255]))).unwrap();

        assert_eq!(sink.render_count(), 1);
        assert_eq!(sink.state().lock().unwrap().last_dimensions, Some((3, 5)));
        assert_eq!(sink.last_corner(), Some([7, 7, 7, 255]));
    }

    #[test]
    fn test_simulated_failures_run_out() {
        let sink = MockSink::new();
        let mut owned = sink.clone();
        sink.fail_next(1);
        let frame = ImageBuffer::from_pixel(1, 1, Rgba([0, 0, 0, 255]));

        assert!(owned.render(&frame).is_err());
        assert!(owned.render(&frame).is_ok());
        assert_eq!(sink.attempt_count(), 2);
        assert_eq!(sink.render_count(), 1);
    }
}
