use std::time::{Duration, Instant};

use crate::capture::domain::frame_source::{CaptureError, FrameSource};
use crate::shared::frame::Frame;

/// Default pacing for generated frames (~15 fps).
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(66);

const BLOB_COLOR: [u8; 3] = [224, 172, 140];
const BLOB_STEP_PX: f64 = 6.0;

/// Fallback source used when no real camera can be acquired.
///
/// Renders a vertical gradient with a face-sized elliptical blob that
/// drifts back and forth, so detection, quality sampling and tracking
/// all keep running against plausible pixel data.
pub struct SyntheticFrameSource {
    width: u32,
    height: u32,
    frame_interval: Duration,
    last_emitted: Option<Instant>,
    frame_index: usize,
    released: bool,
}

impl SyntheticFrameSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_frame_interval(width, height, DEFAULT_FRAME_INTERVAL)
    }

    pub fn with_frame_interval(width: u32, height: u32, frame_interval: Duration) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            frame_interval,
            last_emitted: None,
            frame_index: 0,
            released: false,
        }
    }

    fn render(&self) -> Frame {
        let (w, h) = (self.width as usize, self.height as usize);
        let radius_x = (w as f64 * 0.12).max(1.0);
        let radius_y = radius_x * 1.3;

        // Ping-pong horizontally across the frame.
        let travel = (w as f64 - 2.0 * radius_x).max(1.0);
        let phase = (self.frame_index as f64 * BLOB_STEP_PX) % (2.0 * travel);
        let offset = if phase < travel { phase } else { 2.0 * travel - phase };
        let cx = radius_x + offset;
        let cy = h as f64 / 2.0;

        let mut data = Vec::with_capacity(w * h * 3);
        for row in 0..h {
            let shade = (40 + row * 120 / h.max(1)) as u8;
            for col in 0..w {
                let nx = (col as f64 - cx) / radius_x;
                let ny = (row as f64 - cy) / radius_y;
                if nx * nx + ny * ny <= 1.0 {
                    data.extend_from_slice(&BLOB_COLOR);
                } else {
                    data.extend_from_slice(&[shade, shade, shade.saturating_add(20)]);
                }
            }
        }
        Frame::new(data, self.width, self.height, 3, self.frame_index)
    }
}

impl FrameSource for SyntheticFrameSource {
    fn has_fresh_frame(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.last_emitted
            .map_or(true, |t| t.elapsed() >= self.frame_interval)
    }

    fn capture_frame(&mut self) -> Result<Frame, CaptureError> {
        if self.released {
            return Err(CaptureError::Disconnected("synthetic source released".into()));
        }
        let frame = self.render();
        self.frame_index += 1;
        self.last_emitted = Some(Instant::now());
        Ok(frame)
    }

    fn release(&mut self) {
        self.released = true;
    }
}
