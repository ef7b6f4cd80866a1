//! Frame usability scoring from brightness, contrast and a sharpness proxy.
//!
//! Pure function over pixel data; the stream session decides how often
//! to call it.

use serde::Serialize;

use crate::shared::frame::Frame;

/// Longest side of the sampling grid; larger frames are strided.
const MAX_SAMPLES_PER_SIDE: u32 = 160;

/// Mean absolute Laplacian (luma units) treated as fully sharp.
const SHARPNESS_REFERENCE: f64 = 20.0;

/// Contrast (std-dev / 128) treated as fully contrasted.
const CONTRAST_REFERENCE: f64 = 0.35;

const BRIGHTNESS_WEIGHT: f64 = 0.4;
const CONTRAST_WEIGHT: f64 = 0.3;
const SHARPNESS_WEIGHT: f64 = 0.3;

const GOOD_THRESHOLD: f64 = 0.6;
const FAIR_THRESHOLD: f64 = 0.35;

const DARK_BELOW: f64 = 0.25;
const BRIGHT_ABOVE: f64 = 0.85;
const LOW_CONTRAST_BELOW: f64 = 0.1;
const BLURRY_BELOW: f64 = 0.15;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityCategory {
    Good,
    Fair,
    Poor,
}

impl QualityCategory {
    pub fn from_score(score: f64) -> Self {
        if score >= GOOD_THRESHOLD {
            QualityCategory::Good
        } else if score >= FAIR_THRESHOLD {
            QualityCategory::Fair
        } else {
            QualityCategory::Poor
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QualityAssessment {
    /// Overall usability in [0, 1].
    pub score: f64,
    pub category: QualityCategory,
    /// Most pressing problem, if any.
    pub warning: Option<String>,
    pub brightness: f64,
    pub contrast: f64,
    pub sharpness: f64,
}

/// Scores `frame` for face-detection usability.
pub fn assess(frame: &Frame) -> QualityAssessment {
    let luma = sample_luma(frame);
    if luma.values.is_empty() {
        return QualityAssessment {
            score: 0.0,
            category: QualityCategory::Poor,
            warning: Some("empty frame".to_string()),
            brightness: 0.0,
            contrast: 0.0,
            sharpness: 0.0,
        };
    }

    let n = luma.values.len() as f64;
    let mean = luma.values.iter().sum::<f64>() / n;
    let variance = luma.values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    let brightness = mean / 255.0;
    let contrast = (variance.sqrt() / 128.0).min(1.0);
    let sharpness = (luma.mean_abs_laplacian() / SHARPNESS_REFERENCE).min(1.0);

    let brightness_score = 1.0 - ((brightness - 0.5).abs() * 2.0);
    let contrast_score = (contrast / CONTRAST_REFERENCE).min(1.0);
    let score = (BRIGHTNESS_WEIGHT * brightness_score
        + CONTRAST_WEIGHT * contrast_score
        + SHARPNESS_WEIGHT * sharpness)
        .clamp(0.0, 1.0);

    let warning = if brightness < DARK_BELOW {
        Some("too dark")
    } else if brightness > BRIGHT_ABOVE {
        Some("too bright")
    } else if contrast < LOW_CONTRAST_BELOW {
        Some("low contrast")
    } else if sharpness < BLURRY_BELOW {
        Some("blurry")
    } else {
        None
    };

    QualityAssessment {
        score,
        category: QualityCategory::from_score(score),
        warning: warning.map(str::to_string),
        brightness,
        contrast,
        sharpness,
    }
}

/// Luma values on a strided grid, row-major.
struct LumaGrid {
    values: Vec<f64>,
    cols: usize,
    rows: usize,
}

impl LumaGrid {
    fn at(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.cols + col]
    }

    /// 4-neighbour Laplacian magnitude averaged over interior samples.
    fn mean_abs_laplacian(&self) -> f64 {
        if self.rows < 3 || self.cols < 3 {
            return 0.0;
        }
        let mut total = 0.0;
        for r in 1..self.rows - 1 {
            for c in 1..self.cols - 1 {
                let lap = 4.0 * self.at(r, c)
                    - self.at(r - 1, c)
                    - self.at(r + 1, c)
                    - self.at(r, c - 1)
                    - self.at(r, c + 1);
                total += lap.abs();
            }
        }
        total / ((self.rows - 2) * (self.cols - 2)) as f64
    }
}

fn sample_luma(frame: &Frame) -> LumaGrid {
    let (w, h) = (frame.width(), frame.height());
    let channels = frame.channels() as usize;
    if w == 0 || h == 0 || channels == 0 {
        return LumaGrid {
            values: Vec::new(),
            cols: 0,
            rows: 0,
        };
    }

    let step = (w.max(h) / MAX_SAMPLES_PER_SIDE).max(1) as usize;
    let data = frame.data();
    let row_stride = w as usize * channels;

    let mut values = Vec::new();
    let mut rows = 0;
    for y in (0..h as usize).step_by(step) {
        rows += 1;
        for x in (0..w as usize).step_by(step) {
            let px = &data[y * row_stride + x * channels..][..channels];
            let l = if channels >= 3 {
                0.299 * px[0] as f64 + 0.587 * px[1] as f64 + 0.114 * px[2] as f64
            } else {
                px[0] as f64
            };
            values.push(l);
        }
    }
    let cols = (w as usize).div_ceil(step);
    LumaGrid { values, cols, rows }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    fn uniform(value: u8) -> Frame {
        Frame::new(vec![value; 64 * 64 * 3], 64, 64, 3, 0)
    }

    /// 8px checkerboard alternating between `dark` and `light`.
    fn checkerboard(dark: u8, light: u8) -> Frame {
        let mut data = Vec::with_capacity(64 * 64 * 3);
        for y in 0..64 {
            for x in 0..64 {
                let v = if (x / 8 + y / 8) % 2 == 0 { dark } else { light };
                data.extend_from_slice(&[v, v, v]);
            }
        }
        Frame::new(data, 64, 64, 3, 0)
    }

    #[rstest]
    #[case(0.9, QualityCategory::Good)]
    #[case(0.6, QualityCategory::Good)]
    #[case(0.5, QualityCategory::Fair)]
    #[case(0.35, QualityCategory::Fair)]
    #[case(0.1, QualityCategory::Poor)]
    fn test_category_thresholds(#[case] score: f64, #[case] expected: QualityCategory) {
        assert_eq!(QualityCategory::from_score(score), expected);
    }

    #[test]
    fn test_black_frame_is_poor_and_dark() {
        let q = assess(&uniform(0));
        assert_relative_eq!(q.brightness, 0.0);
        assert_eq!(q.category, QualityCategory::Poor);
        assert_eq!(q.warning.as_deref(), Some("too dark"));
    }

    #[test]
    fn test_white_frame_is_too_bright() {
        let q = assess(&uniform(255));
        assert_eq!(q.warning.as_deref(), Some("too bright"));
        assert_eq!(q.category, QualityCategory::Poor);
    }

    #[test]
    fn test_flat_mid_gray_is_low_contrast() {
        let q = assess(&uniform(128));
        assert_relative_eq!(q.contrast, 0.0);
        assert_relative_eq!(q.sharpness, 0.0);
        assert_eq!(q.warning.as_deref(), Some("low contrast"));
        assert_eq!(q.category, QualityCategory::Fair);
    }

    #[test]
    fn test_textured_frame_is_good() {
        let q = assess(&checkerboard(60, 200));
        assert_eq!(q.category, QualityCategory::Good);
        assert!(q.warning.is_none());
        assert!(q.sharpness > 0.5);
    }

    #[test]
    fn test_score_is_bounded() {
        for frame in [uniform(0), uniform(255), checkerboard(0, 255)] {
            let q = assess(&frame);
            assert!((0.0..=1.0).contains(&q.score));
        }
    }

    #[test]
    fn test_large_frames_are_strided() {
        let frame = Frame::new(vec![100u8; 1920 * 1080 * 3], 1920, 1080, 3, 0);
        let grid = sample_luma(&frame);
        assert!(grid.cols <= 160 && grid.rows <= 160);
        assert_eq!(grid.values.len(), grid.cols * grid.rows);
    }

    #[test]
    fn test_empty_frame_is_poor() {
        let q = assess(&Frame::new(Vec::new(), 0, 0, 3, 0));
        assert_eq!(q.category, QualityCategory::Poor);
    }
}
