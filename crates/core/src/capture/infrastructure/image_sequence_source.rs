use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::capture::domain::frame_source::{AcquisitionError, CaptureError, FrameSource};
use crate::shared::constants::IMAGE_EXTENSIONS;
use crate::shared::frame::Frame;

/// Default replay pacing (~10 fps).
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(100);

/// Replays a directory of still images as a looping live stream.
///
/// Files are ordered by name and decoded lazily with the `image` crate,
/// one per frame interval.
pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    frame_interval: Duration,
    cursor: usize,
    frame_index: usize,
    last_emitted: Option<Instant>,
    released: bool,
}

impl ImageSequenceSource {
    pub fn open(dir: &Path, frame_interval: Duration) -> Result<Self, AcquisitionError> {
        let entries = std::fs::read_dir(dir).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => {
                AcquisitionError::PermissionDenied(dir.display().to_string())
            }
            std::io::ErrorKind::NotFound => AcquisitionError::NoDevice(dir.display().to_string()),
            _ => AcquisitionError::Open {
                selector: dir.display().to_string(),
                reason: e.to_string(),
            },
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| is_image(p))
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(AcquisitionError::NoDevice(format!(
                "{} contains no images",
                dir.display()
            )));
        }

        log::debug!("Image sequence {} has {} frames", dir.display(), paths.len());
        Ok(Self {
            paths,
            frame_interval,
            cursor: 0,
            frame_index: 0,
            last_emitted: None,
            released: false,
        })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl FrameSource for ImageSequenceSource {
    fn has_fresh_frame(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.last_emitted
            .map_or(true, |t| t.elapsed() >= self.frame_interval)
    }

    fn capture_frame(&mut self) -> Result<Frame, CaptureError> {
        if self.released {
            return Err(CaptureError::Disconnected("image sequence released".into()));
        }
        let path = &self.paths[self.cursor];
        self.cursor = (self.cursor + 1) % self.paths.len();
        self.last_emitted = Some(Instant::now());

        let img = image::open(path)
            .map_err(|e| CaptureError::Decode(format!("{}: {e}", path.display())))?
            .to_rgb8();
        let frame = Frame::from_rgb_image(img, self.frame_index);
        self.frame_index += 1;
        Ok(frame)
    }

    fn release(&mut self) {
        self.released = true;
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}
