//! Synthetic green-screen source for running without ffmpeg or assets.

use super::FrameSource;
use crate::frame::{PixelFormat, VideoFrame};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// The pattern's key color.
pub const KEY_GREEN: [u8; 4] = [0, 255, 0, 255];

/// Pixels at the bottom-right kept free of speckle and foreground, so the
/// corner the keying shader samples is always solid key color.
const CORNER_MARGIN: usize = 8;

/// Procedural green-screen video: speckled key-green background with a
/// wandering foreground block. Frames are a deterministic function of the
/// frame index, so a restart reproduces the same sequence.
pub struct TestPatternSource {
    width: u32,
    height: u32,
    fps: f32,
    frame: VideoFrame,
    rendered_index: Option<u64>,
    start_time: Option<f32>,
    paused: bool,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            fps: 30.0,
            frame: VideoFrame::new(width, height, PixelFormat::Rgba),
            rendered_index: None,
            start_time: None,
            paused: false,
        }
    }

    fn render_index(&mut self, index: u64) {
        if self.rendered_index == Some(index) {
            return;
        }

        let w = self.width as usize;
        let h = self.height as usize;
        let data = &mut self.frame.data;
        let mut rng = StdRng::seed_from_u64(index);

        // Unevenly lit green screen: the green channel flickers downward a
        // little per pixel
        for pixel in data.chunks_exact_mut(4) {
            let dim: u8 = rng.random_range(0..24);
            pixel[0] = 0;
            pixel[1] = 255 - dim;
            pixel[2] = 0;
            pixel[3] = 255;
        }

        // Wandering foreground block, kept in the upper part of the frame
        let t = index as f32 / self.fps;
        let block_w = w / 5;
        let block_h = h / 3;
        let x0 = (((t * 0.7).sin() * 0.5 + 0.5) * (w - block_w) as f32) as usize;
        let y0 = (((t * 1.1).cos() * 0.5 + 0.5) * (h - block_h) as f32 * 0.5) as usize;
        for y in y0..(y0 + block_h).min(h) {
            for x in x0..(x0 + block_w).min(w) {
                let o = (y * w + x) * 4;
                data[o..o + 4].copy_from_slice(&[230, 120, 40, 255]);
            }
        }

        // Last: re-assert the clean reference corner
        let margin = CORNER_MARGIN.min(w).min(h);
        for y in (h - margin)..h {
            for x in (w - margin)..w {
                let o = (y * w + x) * 4;
                data[o..o + 4].copy_from_slice(&KEY_GREEN);
            }
        }

        self.frame.timestamp_us = Some((index as f64 / self.fps as f64 * 1e6) as u64);
        self.rendered_index = Some(index);
    }
}

impl FrameSource for TestPatternSource {
    fn current_frame(&mut self, time: f32) -> Option<&VideoFrame> {
        if self.paused {
            return Some(&self.frame);
        }
        let start = *self.start_time.get_or_insert(time);
        let playback_time = (time - start).max(0.0);
        let index = (playback_time * self.fps) as u64;
        self.render_index(index);
        Some(&self.frame)
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn toggle_playback(&mut self, time: f32) {
        if self.paused {
            self.start_time = Some(time);
            self.rendered_index = None;
            self.paused = false;
        } else {
            self.paused = true;
        }
    }

    fn is_paused(&self) -> bool {
        self.paused
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corner_pixel(frame: &VideoFrame) -> [u8; 4] {
        let w = frame.width as usize;
        let h = frame.height as usize;
        let o = ((h - 1) * w + (w - 1)) * 4;
        frame.data[o..o + 4].try_into().unwrap()
    }

    #[test]
    fn reference_corner_is_always_key_green() {
        let mut source = TestPatternSource::new(320, 180);
        for time in [0.0, 0.5, 1.3, 2.7, 10.0] {
            let frame = source.current_frame(time).unwrap().clone();
            assert_eq!(corner_pixel(&frame), KEY_GREEN, "at time {time}");
        }
    }

    #[test]
    fn frames_have_rgba_layout() {
        let mut source = TestPatternSource::new(320, 180);
        assert_eq!(source.size(), (320, 180));
        let frame = source.current_frame(0.0).unwrap();
        assert_eq!(frame.format, PixelFormat::Rgba);
        assert_eq!(frame.data.len(), 320 * 180 * 4);
    }

    #[test]
    fn pattern_contains_foreground() {
        let mut source = TestPatternSource::new(320, 180);
        let frame = source.current_frame(0.0).unwrap();
        let has_block = frame.data.chunks_exact(4).any(|p| p[0] > 150);
        assert!(has_block, "no foreground block found");
    }

    #[test]
    fn pause_freezes_and_restart_replays_from_zero() {
        let mut source = TestPatternSource::new(160, 90);
        let first = source.current_frame(0.0).unwrap().clone();

        source.toggle_playback(0.5);
        assert!(source.is_paused());
        let frozen = source.current_frame(5.0).unwrap().clone();
        assert_eq!(frozen.data, first.data);

        // Un-pausing restarts from the beginning
        source.toggle_playback(6.0);
        assert!(!source.is_paused());
        let restarted = source.current_frame(6.0).unwrap().clone();
        assert_eq!(restarted.data, first.data);
    }

    #[test]
    fn frames_advance_with_the_clock() {
        let mut source = TestPatternSource::new(160, 90);
        let first = source.current_frame(0.0).unwrap().clone();
        let later = source.current_frame(2.0).unwrap().clone();
        assert_ne!(first.data, later.data);
    }
}
