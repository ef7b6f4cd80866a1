/// ArcFace embedding recognizer using ONNX Runtime.
///
/// Faces are identified locally by cosine similarity against a gallery
/// enrolled from a directory of reference photos named
/// `<personId>_<name>.<ext>`.
use std::path::Path;
use std::sync::Mutex;

use crate::recognition::domain::face_recognizer::{
    FaceRecognizer, RecognitionError, RecognitionOutcome,
};
use crate::shared::constants::IMAGE_EXTENSIONS;
use crate::shared::frame::Frame;
use crate::shared::onnx_session;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub const DEFAULT_THRESHOLD: f64 = 0.4;

const INPUT_SIZE: usize = 112;
const NORM_MEAN: f32 = 127.5;
const NORM_STD: f32 = 127.5;
const MAX_INTRA_THREADS: usize = 2;

#[derive(Clone, Debug)]
struct GalleryEntry {
    person_id: String,
    name: String,
    embedding: Vec<f32>,
}

/// Enrolled reference embeddings.
#[derive(Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn enroll(&mut self, person_id: &str, name: &str, mut embedding: Vec<f32>) {
        l2_normalize(&mut embedding);
        self.entries.push(GalleryEntry {
            person_id: person_id.to_string(),
            name: name.to_string(),
            embedding,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most similar enrolled person at or above `threshold`.
    pub fn best_match(&self, embedding: &[f32], threshold: f64) -> Option<RecognitionOutcome> {
        self.entries
            .iter()
            .map(|entry| (entry, cosine_similarity(&entry.embedding, embedding)))
            .filter(|(_, similarity)| *similarity >= threshold)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(entry, similarity)| RecognitionOutcome {
                person_id: Some(entry.person_id.as_str().into()),
                name: Some(entry.name.clone()),
                confidence: similarity.clamp(0.0, 1.0),
            })
    }
}

pub struct EmbeddingFaceRecognizer {
    session: Mutex<ort::session::Session>,
    gallery: Gallery,
    threshold: f64,
}

impl EmbeddingFaceRecognizer {
    pub fn new(model_path: &Path, threshold: f64) -> Result<Self, BoxError> {
        let session = onnx_session::load_session(model_path, MAX_INTRA_THREADS)?;
        Ok(Self {
            session: Mutex::new(session),
            gallery: Gallery::default(),
            threshold,
        })
    }

    /// Enrolls every reference photo in `dir`; unreadable files are
    /// skipped with a warning. Returns how many were enrolled.
    pub fn enroll_directory(&mut self, dir: &Path) -> Result<usize, BoxError> {
        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
            })
            .collect();
        paths.sort();

        let mut enrolled = 0;
        for path in paths {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let (person_id, name) = parse_gallery_name(stem);
            let embedding = image::open(&path)
                .map_err(|e| -> BoxError { e.into() })
                .and_then(|img| {
                    let face = Frame::from_rgb_image(img.to_rgb8(), 0);
                    self.embed(&face).map_err(|e| -> BoxError { e.into() })
                });
            match embedding {
                Ok(embedding) => {
                    self.gallery.enroll(&person_id, &name, embedding);
                    enrolled += 1;
                }
                Err(e) => log::warn!("Skipping gallery image {}: {e}", path.display()),
            }
        }
        log::info!("Enrolled {enrolled} gallery faces from {}", dir.display());
        Ok(enrolled)
    }

    fn embed(&self, face: &Frame) -> Result<Vec<f32>, RecognitionError> {
        let tensor = preprocess(face.data(), face.width(), face.height());
        let input_value = ort::value::Tensor::from_array(tensor).map_err(backend)?;
        let mut session = self
            .session
            .lock()
            .map_err(|e| RecognitionError::Backend(format!("Lock poisoned: {e}")))?;
        let outputs = session.run(ort::inputs![input_value]).map_err(backend)?;
        let embedding_array = outputs[0].try_extract_array::<f32>().map_err(backend)?;
        let embedding_slice = embedding_array
            .as_slice()
            .ok_or_else(|| RecognitionError::Backend("Cannot get embedding slice".into()))?;

        let mut embedding = embedding_slice.to_vec();
        l2_normalize(&mut embedding);
        Ok(embedding)
    }
}

impl FaceRecognizer for EmbeddingFaceRecognizer {
    fn recognize(&self, face: &Frame) -> Result<Option<RecognitionOutcome>, RecognitionError> {
        if self.gallery.is_empty() || face.width() == 0 || face.height() == 0 {
            return Ok(None);
        }
        let embedding = self.embed(face)?;
        Ok(self.gallery.best_match(&embedding, self.threshold))
    }
}

fn backend(e: impl std::fmt::Display) -> RecognitionError {
    RecognitionError::Backend(e.to_string())
}

/// `"42_Ada_Lovelace"` → `("42", "Ada Lovelace")`; a stem without an
/// underscore is used as both id and name.
fn parse_gallery_name(stem: &str) -> (String, String) {
    match stem.split_once('_') {
        Some((id, name)) if !id.is_empty() && !name.is_empty() => {
            (id.to_string(), name.replace('_', " "))
        }
        _ => (stem.to_string(), stem.to_string()),
    }
}

/// Resize crop to 112x112, normalize, NCHW layout.
fn preprocess(rgb_data: &[u8], width: u32, height: u32) -> ndarray::Array4<f32> {
    let src_w = width as usize;
    let src_h = height as usize;

    let mut tensor = ndarray::Array4::<f32>::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));

    for y in 0..INPUT_SIZE {
        let src_y = (((y as f64 + 0.5) * src_h as f64 / INPUT_SIZE as f64) as usize).min(src_h - 1);
        for x in 0..INPUT_SIZE {
            let src_x =
                (((x as f64 + 0.5) * src_w as f64 / INPUT_SIZE as f64) as usize).min(src_w - 1);
            let offset = (src_y * src_w + src_x) * 3;
            if offset + 2 < rgb_data.len() {
                for c in 0..3 {
                    tensor[[0, c, y, x]] = (rgb_data[offset + c] as f32 - NORM_MEAN) / NORM_STD;
                }
            }
        }
    }

    tensor
}

fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Dot product of L2-normalized vectors equals cosine similarity.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognition::domain::face_recognizer::PersonId;
    use approx::assert_relative_eq;
    use rstest::rstest;

    #[rstest]
    #[case("42_Ada", "42", "Ada")]
    #[case("7_Grace_Hopper", "7", "Grace Hopper")]
    #[case("visitor", "visitor", "visitor")]
    #[case("_odd", "_odd", "_odd")]
    fn test_parse_gallery_name(#[case] stem: &str, #[case] id: &str, #[case] name: &str) {
        assert_eq!(parse_gallery_name(stem), (id.to_string(), name.to_string()));
    }

    #[test]
    fn test_l2_normalize_unit_vector() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert_relative_eq!(v[0], 0.6, epsilon = 1e-6);
        assert_relative_eq!(v[1], 0.8, epsilon = 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        let mut v = vec![0.0, 0.0, 0.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_gallery_best_match_picks_most_similar() {
        let mut gallery = Gallery::default();
        gallery.enroll("1", "Ada", vec![1.0, 0.0, 0.0]);
        gallery.enroll("2", "Grace", vec![0.0, 1.0, 0.0]);

        let mut query = vec![0.2, 0.9, 0.1];
        l2_normalize(&mut query);
        let outcome = gallery.best_match(&query, DEFAULT_THRESHOLD).unwrap();
        assert_eq!(outcome.person_id, Some(PersonId::from("2")));
        assert_eq!(outcome.name.as_deref(), Some("Grace"));
        assert!(outcome.confidence > 0.9);
    }

    #[test]
    fn test_gallery_below_threshold_is_no_match() {
        let mut gallery = Gallery::default();
        gallery.enroll("1", "Ada", vec![1.0, 0.0]);
        assert!(gallery.best_match(&[0.0, 1.0], DEFAULT_THRESHOLD).is_none());
    }

    #[test]
    fn test_empty_gallery_is_no_match() {
        assert!(Gallery::default().best_match(&[1.0], 0.0).is_none());
    }

    #[test]
    fn test_preprocess_shape_and_normalization() {
        let data = vec![255u8; 50 * 50 * 3];
        let tensor = preprocess(&data, 50, 50);
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
        assert_relative_eq!(tensor[[0, 0, 0, 0]], 1.0, epsilon = 0.01);
    }
}
