use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::capture::domain::frame_source::{AcquisitionError, CaptureError, FrameSource};
use crate::shared::frame::Frame;

/// How long `open` waits for the decoder thread to open the input.
const OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Latest decoded frame plus the reason decoding stopped, if it has.
#[derive(Default)]
struct LatestFrame {
    frame: Option<Frame>,
    ended: Option<String>,
}

enum PassEnd {
    Stopped,
    EndOfStream { produced: usize },
}

/// Live source backed by ffmpeg-next (libavformat + libavcodec).
///
/// A background thread decodes continuously and keeps only the newest
/// RGB frame, so a slow detection loop always sees the present instead
/// of a growing backlog. Files are replayed in a loop at their native
/// frame rate; network streams and devices run until they end.
pub struct FfmpegFrameSource {
    location: String,
    latest: Arc<Mutex<LatestFrame>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FfmpegFrameSource {
    /// Opens `location` (file path, device path or URL) and starts decoding.
    pub fn open(location: &str) -> Result<Self, AcquisitionError> {
        let latest = Arc::new(Mutex::new(LatestFrame::default()));
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), String>>(1);

        let handle = {
            let location = location.to_string();
            let latest = latest.clone();
            let stop = stop.clone();
            thread::spawn(move || run_decoder(&location, &latest, &stop, ready_tx))
        };

        let mut source = Self {
            location: location.to_string(),
            latest,
            stop,
            handle: Some(handle),
        };

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(())) => {
                log::info!("Opened video source {location}");
                Ok(source)
            }
            Ok(Err(reason)) => {
                source.release();
                Err(classify_open_error(location, reason))
            }
            Err(_) => {
                source.release();
                Err(AcquisitionError::Open {
                    selector: location.to_string(),
                    reason: "timed out probing input".to_string(),
                })
            }
        }
    }

    /// A source whose decoder already stopped with `reason`.
    #[cfg(test)]
    pub(crate) fn ended(reason: &str) -> Self {
        Self {
            location: "test".into(),
            latest: Arc::new(Mutex::new(LatestFrame {
                frame: None,
                ended: Some(reason.to_string()),
            })),
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LatestFrame> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FrameSource for FfmpegFrameSource {
    /// Also true once the decoder has ended, so the next capture
    /// reports the disconnect.
    fn has_fresh_frame(&mut self) -> bool {
        let latest = self.lock();
        latest.frame.is_some() || latest.ended.is_some()
    }

    fn capture_frame(&mut self) -> Result<Frame, CaptureError> {
        let mut latest = self.lock();
        if let Some(frame) = latest.frame.take() {
            return Ok(frame);
        }
        match latest.ended {
            Some(ref reason) => Err(CaptureError::Disconnected(reason.clone())),
            None => Err(CaptureError::NoFrame),
        }
    }

    fn release(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            // A blocked network read can outlive the stop flag; detach then.
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                log::debug!("Detaching decoder thread for {}", self.location);
            }
        }
    }
}

impl Drop for FfmpegFrameSource {
    fn drop(&mut self) {
        self.release();
    }
}

fn run_decoder(
    location: &str,
    latest: &Mutex<LatestFrame>,
    stop: &AtomicBool,
    ready_tx: crossbeam_channel::Sender<Result<(), String>>,
) {
    let mut ready_tx = Some(ready_tx);
    let is_live = location.contains("://");
    let mut frame_index = 0usize;

    let ended = loop {
        match decode_pass(location, is_live, latest, stop, &mut ready_tx, &mut frame_index) {
            Ok(PassEnd::Stopped) => return,
            Ok(PassEnd::EndOfStream { produced }) if !is_live && produced > 0 => {
                log::debug!("Rewinding {location} after {produced} frames");
            }
            Ok(PassEnd::EndOfStream { .. }) => break "stream ended".to_string(),
            Err(e) => {
                if let Some(tx) = ready_tx.take() {
                    let _ = tx.send(Err(e.to_string()));
                    return;
                }
                break e.to_string();
            }
        }
    };

    log::warn!("Video source {location} stopped: {ended}");
    latest.lock().unwrap_or_else(PoisonError::into_inner).ended = Some(ended);
}

/// Decodes the input once from the start, publishing every frame.
fn decode_pass(
    location: &str,
    is_live: bool,
    latest: &Mutex<LatestFrame>,
    stop: &AtomicBool,
    ready_tx: &mut Option<crossbeam_channel::Sender<Result<(), String>>>,
    frame_index: &mut usize,
) -> Result<PassEnd, ffmpeg_next::Error> {
    ffmpeg_next::init()?;
    let mut ictx = ffmpeg_next::format::input(&location)?;

    let (stream_index, fps, mut decoder) = {
        let stream = ictx
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or(ffmpeg_next::Error::StreamNotFound)?;
        let rate = stream.rate();
        let fps = if rate.denominator() != 0 {
            rate.numerator() as f64 / rate.denominator() as f64
        } else {
            0.0
        };
        let codec_ctx =
            ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())?;
        (stream.index(), fps, codec_ctx.decoder().video()?)
    };

    let width = decoder.width();
    let height = decoder.height();
    let mut scaler = ffmpeg_next::software::scaling::Context::get(
        decoder.format(),
        width,
        height,
        ffmpeg_next::format::Pixel::RGB24,
        width,
        height,
        ffmpeg_next::software::scaling::Flags::BILINEAR,
    )?;

    if let Some(tx) = ready_tx.take() {
        let _ = tx.send(Ok(()));
    }

    let pace = (!is_live && fps > 0.0).then(|| Duration::from_secs_f64(1.0 / fps));
    let mut produced = 0usize;
    let mut decoded = ffmpeg_next::util::frame::video::Video::empty();
    let mut publish = |decoded: &ffmpeg_next::util::frame::video::Video,
                       scaler: &mut ffmpeg_next::software::scaling::Context|
     -> Result<(), ffmpeg_next::Error> {
        let mut rgb_frame = ffmpeg_next::util::frame::video::Video::empty();
        scaler.run(decoded, &mut rgb_frame)?;
        let pixels = extract_rgb_pixels(&rgb_frame, width, height);
        let frame = Frame::new(pixels, width, height, 3, *frame_index);
        *frame_index += 1;
        produced += 1;
        latest.lock().unwrap_or_else(PoisonError::into_inner).frame = Some(frame);
        if let Some(p) = pace {
            thread::sleep(p);
        }
        Ok(())
    };

    for (stream, packet) in ictx.packets() {
        if stop.load(Ordering::Relaxed) {
            return Ok(PassEnd::Stopped);
        }
        if stream.index() != stream_index || decoder.send_packet(&packet).is_err() {
            continue;
        }
        while decoder.receive_frame(&mut decoded).is_ok() {
            publish(&decoded, &mut scaler)?;
        }
    }

    let _ = decoder.send_eof();
    while decoder.receive_frame(&mut decoded).is_ok() {
        publish(&decoded, &mut scaler)?;
    }

    if stop.load(Ordering::Relaxed) {
        return Ok(PassEnd::Stopped);
    }
    Ok(PassEnd::EndOfStream { produced })
}

/// Copies pixel data from an ffmpeg frame into a tightly-packed RGB buffer,
/// dropping any per-row stride padding.
fn extract_rgb_pixels(
    rgb_frame: &ffmpeg_next::util::frame::video::Video,
    width: u32,
    height: u32,
) -> Vec<u8> {
    let stride = rgb_frame.stride(0);
    let data = rgb_frame.data(0);
    let row_bytes = width as usize * 3;

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let row_start = row * stride;
        pixels.extend_from_slice(&data[row_start..row_start + row_bytes]);
    }
    pixels
}

fn classify_open_error(location: &str, reason: String) -> AcquisitionError {
    let lowered = reason.to_lowercase();
    if lowered.contains("permission denied") {
        AcquisitionError::PermissionDenied(location.to_string())
    } else if lowered.contains("no such file") || lowered.contains("stream not found") {
        AcquisitionError::NoDevice(format!("{location}: {reason}"))
    } else {
        AcquisitionError::Open {
            selector: location.to_string(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Permission denied", "permission")]
    #[case("No such file or directory", "no_device")]
    #[case("Stream not found", "no_device")]
    #[case("Invalid data found when processing input", "open")]
    fn test_classify_open_error(#[case] reason: &str, #[case] expected: &str) {
        let kind = match classify_open_error("/dev/video9", reason.to_string()) {
            AcquisitionError::PermissionDenied(_) => "permission",
            AcquisitionError::NoDevice(_) => "no_device",
            AcquisitionError::Open { .. } => "open",
            AcquisitionError::FallbackRequested => "fallback",
        };
        assert_eq!(kind, expected);
    }

    #[test]
    fn test_open_missing_file_fails_without_hanging() {
        let result = FfmpegFrameSource::open("/definitely/not/here/video.mp4");
        assert!(matches!(
            result,
            Err(AcquisitionError::NoDevice(_)) | Err(AcquisitionError::Open { .. })
        ));
    }

    #[test]
    fn test_capture_reports_disconnect_after_end() {
        let mut source = FfmpegFrameSource::ended("stream ended");
        assert!(source.has_fresh_frame());
        assert!(matches!(
            source.capture_frame(),
            Err(CaptureError::Disconnected(_))
        ));
    }

    #[test]
    fn test_capture_takes_latest_frame_once() {
        let frame = Frame::new(vec![0u8; 12], 2, 2, 3, 4);
        let mut source = FfmpegFrameSource {
            location: "test".into(),
            latest: Arc::new(Mutex::new(LatestFrame {
                frame: Some(frame),
                ended: None,
            })),
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
        };
        assert!(source.has_fresh_frame());
        assert_eq!(source.capture_frame().unwrap().index(), 4);
        assert!(matches!(source.capture_frame(), Err(CaptureError::NoFrame)));
    }
}
