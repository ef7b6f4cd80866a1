use std::path::Path;
use std::time::Duration;

use crate::capture::domain::device_selector::DeviceSelector;
use crate::capture::domain::frame_source::{AcquisitionError, FrameSource, SourceProvider};
use crate::capture::infrastructure::ffmpeg_frame_source::FfmpegFrameSource;
use crate::capture::infrastructure::image_sequence_source::{self, ImageSequenceSource};

/// Device path tried for [`DeviceSelector::Default`].
#[cfg(target_os = "linux")]
const DEFAULT_CAMERA_PATH: Option<&str> = Some("/dev/video0");
#[cfg(not(target_os = "linux"))]
const DEFAULT_CAMERA_PATH: Option<&str> = None;

/// Routes selectors to the concrete sources this crate ships.
///
/// `Synthetic` is never opened here: it is reported as
/// [`AcquisitionError::FallbackRequested`] so the session decides
/// whether fallback is allowed.
pub struct DefaultSourceProvider {
    image_interval: Duration,
}

impl DefaultSourceProvider {
    pub fn new() -> Self {
        Self {
            image_interval: image_sequence_source::DEFAULT_FRAME_INTERVAL,
        }
    }

    pub fn with_image_interval(image_interval: Duration) -> Self {
        Self { image_interval }
    }
}

impl Default for DefaultSourceProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceProvider for DefaultSourceProvider {
    fn acquire(&self, selector: &DeviceSelector) -> Result<Box<dyn FrameSource>, AcquisitionError> {
        match selector {
            DeviceSelector::Synthetic => Err(AcquisitionError::FallbackRequested),
            DeviceSelector::ImageDirectory(dir) => Ok(Box::new(ImageSequenceSource::open(
                dir,
                self.image_interval,
            )?)),
            DeviceSelector::Device(location) => Ok(Box::new(FfmpegFrameSource::open(location)?)),
            DeviceSelector::Default => match DEFAULT_CAMERA_PATH {
                Some(path) if Path::new(path).exists() => {
                    Ok(Box::new(FfmpegFrameSource::open(path)?))
                }
                _ => Err(AcquisitionError::NoDevice("no default camera".to_string())),
            },
        }
    }
}
