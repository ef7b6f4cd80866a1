/// YOLO face detector using ONNX Runtime via `ort`.
///
/// Handles background model loading, letterbox preprocessing, inference
/// and NMS post-processing. Boxes and landmarks are mapped back into the
/// source frame's pixel space.
use std::path::{Path, PathBuf};
use std::thread;

use crossbeam_channel::{Receiver, TryRecvError};

use crate::detection::domain::face_detector::{DetectionError, FaceDetector, RawDetection};
use crate::shared::bounding_box::BoundingBox;
use crate::shared::frame::Frame;
use crate::shared::onnx_session;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Fallback YOLO model input resolution when the model doesn't specify dimensions.
const DEFAULT_INPUT_SIZE: u32 = 640;

/// Floor applied inside the model decode; the session filters again
/// with its own configured minimum.
pub const DEFAULT_CONFIDENCE: f64 = 0.25;

/// NMS IoU threshold.
const NMS_IOU_THRESH: f64 = 0.45;

/// Number of keypoints per detection (5 landmarks × 3 values each: x, y, conf).
const NUM_KEYPOINT_VALUES: usize = 15;

/// Minimum keypoint confidence to treat a landmark as visible.
const KEYPOINT_CONF_THRESH: f64 = 0.5;

/// Inference threads per detector; streams each own one detector.
const MAX_INTRA_THREADS: usize = 2;

struct LoadedModel {
    session: ort::session::Session,
    input_size: u32,
}

enum ModelState {
    Loading(Receiver<Result<LoadedModel, String>>),
    Ready(LoadedModel),
    Failed(String),
}

/// YOLO face detector backed by an ONNX Runtime session.
pub struct OnnxFaceDetector {
    state: ModelState,
    confidence: f64,
}

impl OnnxFaceDetector {
    /// Loads the model synchronously.
    pub fn from_path(model_path: &Path, confidence: f64) -> Result<Self, BoxError> {
        Ok(Self {
            state: ModelState::Ready(load_model(model_path)?),
            confidence,
        })
    }

    /// Resolves and loads the model on a background thread.
    ///
    /// `resolve` typically downloads the model on first use. Until it
    /// finishes, [`FaceDetector::is_ready`] reports false.
    pub fn spawn_loading<F>(resolve: F, confidence: f64) -> Self
    where
        F: FnOnce() -> Result<PathBuf, BoxError> + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::bounded(1);
        thread::spawn(move || {
            let loaded = resolve()
                .and_then(|path| load_model(&path))
                .map_err(|e| e.to_string());
            let _ = tx.send(loaded);
        });
        Self {
            state: ModelState::Loading(rx),
            confidence,
        }
    }

    fn poll_loading(&mut self) {
        let ModelState::Loading(ref rx) = self.state else {
            return;
        };
        let next = match rx.try_recv() {
            Ok(Ok(model)) => {
                log::info!("Face detection model ready ({}px input)", model.input_size);
                ModelState::Ready(model)
            }
            Ok(Err(reason)) => {
                log::error!("Face detection model failed to load: {reason}");
                ModelState::Failed(reason)
            }
            Err(TryRecvError::Empty) => return,
            Err(TryRecvError::Disconnected) => {
                let reason = "model loader exited without a result".to_string();
                log::error!("{reason}");
                ModelState::Failed(reason)
            }
        };
        self.state = next;
    }
}

fn load_model(model_path: &Path) -> Result<LoadedModel, BoxError> {
    let session = onnx_session::load_session(model_path, MAX_INTRA_THREADS)?;
    let input_size = onnx_session::static_input_size(&session).unwrap_or(DEFAULT_INPUT_SIZE);
    Ok(LoadedModel {
        session,
        input_size,
    })
}

impl FaceDetector for OnnxFaceDetector {
    /// False only while the model is still loading. A model that failed
    /// to load reports ready so every `detect` surfaces the failure.
    fn is_ready(&mut self) -> bool {
        self.poll_loading();
        !matches!(self.state, ModelState::Loading(_))
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>, DetectionError> {
        self.poll_loading();
        let confidence = self.confidence;
        match self.state {
            ModelState::Loading(_) => Err(DetectionError::ModelNotReady),
            ModelState::Failed(ref reason) => Err(DetectionError::Backend(reason.clone())),
            ModelState::Ready(ref mut model) => run_model(model, frame, confidence)
                .map_err(|e| DetectionError::Backend(e.to_string())),
        }
    }
}

fn run_model(
    model: &mut LoadedModel,
    frame: &Frame,
    confidence: f64,
) -> Result<Vec<RawDetection>, BoxError> {
    // 1. Preprocess: letterbox + normalize → NCHW float32
    let letterboxed = letterbox(frame, model.input_size);

    // 2. Inference
    let input_value = ort::value::Tensor::from_array(letterboxed.tensor)?;
    let outputs = model.session.run(ort::inputs![input_value])?;
    if outputs.len() == 0 {
        return Err("YOLO model produced no outputs".into());
    }
    let tensor = outputs[0].try_extract_array::<f32>()?;
    let shape = tensor.shape().to_vec();
    let data = tensor.as_slice().ok_or("Cannot get tensor slice")?;

    // 3. Decode + NMS
    let mut candidates = decode_output(
        data,
        &shape,
        letterboxed.scale,
        letterboxed.pad_x,
        letterboxed.pad_y,
        confidence,
    )?;
    let kept = nms(&mut candidates, NMS_IOU_THRESH);

    Ok(kept
        .into_iter()
        .map(|c| RawDetection {
            landmarks: c.keypoints,
            ..RawDetection::new(BoundingBox::from_corners(c.x1, c.y1, c.x2, c.y2), c.confidence)
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Preprocessing
// ---------------------------------------------------------------------------

struct Letterboxed {
    tensor: ndarray::Array4<f32>,
    scale: f64,
    pad_x: u32,
    pad_y: u32,
}

/// Letterbox-resize a frame to `target_size` × `target_size`.
fn letterbox(frame: &Frame, target_size: u32) -> Letterboxed {
    let fw = frame.width() as f64;
    let fh = frame.height() as f64;
    let target = target_size as f64;

    let scale = (target / fw).min(target / fh);
    let new_w = ((fw * scale).round() as u32).min(target_size);
    let new_h = ((fh * scale).round() as u32).min(target_size);
    let pad_x = (target_size - new_w) / 2;
    let pad_y = (target_size - new_h) / 2;

    // Padded with 114/255 gray, YOLO convention
    let gray = 114.0f32 / 255.0;
    let mut tensor =
        ndarray::Array4::<f32>::from_elem((1, 3, target_size as usize, target_size as usize), gray);

    let src = frame.as_ndarray(); // [H, W, C] u8
    let src_h = frame.height() as usize;
    let src_w = frame.width() as usize;

    // Nearest-neighbor resize + copy into padded region
    for y in 0..new_h as usize {
        let src_y = ((y as f64 / scale) as usize).min(src_h - 1);
        for x in 0..new_w as usize {
            let src_x = ((x as f64 / scale) as usize).min(src_w - 1);
            let ty = pad_y as usize + y;
            let tx = pad_x as usize + x;
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = src[[src_y, src_x, c]] as f32 / 255.0;
            }
        }
    }

    Letterboxed {
        tensor,
        scale,
        pad_x,
        pad_y,
    }
}

// ---------------------------------------------------------------------------
// Decoding + NMS
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct Candidate {
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
    confidence: f64,
    keypoints: Option<[(f64, f64); 5]>,
}

/// Parses YOLO rows `[cx, cy, w, h, conf, kp0_x, kp0_y, kp0_conf, ...]`.
///
/// Output shape is `[1, features, detections]` (transposed) or
/// `[1, detections, features]`; both are handled.
fn decode_output(
    data: &[f32],
    shape: &[usize],
    scale: f64,
    pad_x: u32,
    pad_y: u32,
    confidence: f64,
) -> Result<Vec<Candidate>, String> {
    if shape.len() != 3 {
        return Err(format!("Unexpected YOLO output shape: {shape:?}"));
    }
    let transposed = shape[1] < shape[2];
    let (num_dets, num_feats) = if transposed {
        (shape[2], shape[1])
    } else {
        (shape[1], shape[2])
    };
    if data.len() < num_dets * num_feats {
        return Err(format!(
            "YOLO output has {} values, expected {}",
            data.len(),
            num_dets * num_feats
        ));
    }

    let unmap = |vx: f64, vy: f64| ((vx - pad_x as f64) / scale, (vy - pad_y as f64) / scale);

    let mut candidates = Vec::new();
    for i in 0..num_dets {
        let feat = |f: usize| {
            if transposed {
                data[f * num_dets + i] as f64
            } else {
                data[i * num_feats + f] as f64
            }
        };

        if num_feats < 5 {
            continue;
        }
        let conf = feat(4);
        if conf < confidence {
            continue;
        }

        let (cx, cy, w, h) = (feat(0), feat(1), feat(2), feat(3));
        let (x1, y1) = unmap(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = unmap(cx + w / 2.0, cy + h / 2.0);

        // Landmarks are kept only when all five are confidently visible.
        let keypoints = if num_feats >= 5 + NUM_KEYPOINT_VALUES {
            let mut pts = [(0.0f64, 0.0f64); 5];
            let mut visible = true;
            for (k, pt) in pts.iter_mut().enumerate() {
                let base = 5 + k * 3;
                visible &= feat(base + 2) >= KEYPOINT_CONF_THRESH;
                *pt = unmap(feat(base), feat(base + 1));
            }
            visible.then_some(pts)
        } else {
            None
        };

        candidates.push(Candidate {
            x1,
            y1,
            x2,
            y2,
            confidence: conf,
            keypoints,
        });
    }
    Ok(candidates)
}

/// Greedy NMS: sort by confidence descending, suppress overlapping boxes.
fn nms(dets: &mut [Candidate], iou_thresh: f64) -> Vec<Candidate> {
    dets.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let boxes: Vec<BoundingBox> = dets
        .iter()
        .map(|d| BoundingBox::from_corners(d.x1, d.y1, d.x2, d.y2))
        .collect();

    let mut keep = Vec::new();
    let mut suppressed = vec![false; dets.len()];

    for i in 0..dets.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(dets[i].clone());
        for j in (i + 1)..dets.len() {
            if !suppressed[j] && boxes[i].iou(&boxes[j]) > iou_thresh {
                suppressed[j] = true;
            }
        }
    }
    keep
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
