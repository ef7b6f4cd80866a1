use thiserror::Error;

use crate::shared::bounding_box::BoundingBox;
use crate::shared::frame::Frame;

pub const DEFAULT_PADDING: f64 = 0.2;
pub const DEFAULT_MAX_DIMENSION: u32 = 320;

/// Smallest crop side worth sending for recognition.
const MIN_CROP_SIDE: u32 = 4;

/// The padded, clamped box left too little of the face to recognise.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("degenerate face crop {width}x{height}")]
pub struct InvalidCropError {
    pub width: u32,
    pub height: u32,
}

/// Cuts the face out of `frame` for recognition.
///
/// The box is grown by `padding` on each side, clamped to the frame and
/// downscaled so its longest side is at most `max_dimension`.
pub fn crop_face(
    frame: &Frame,
    bounding_box: &BoundingBox,
    padding: f64,
    max_dimension: u32,
) -> Result<Frame, InvalidCropError> {
    let clamped = bounding_box
        .padded(padding)
        .clamped(frame.width(), frame.height());

    let x0 = clamped.x.floor().max(0.0) as u32;
    let y0 = clamped.y.floor().max(0.0) as u32;
    let x1 = (clamped.right().ceil() as u32).min(frame.width());
    let y1 = (clamped.bottom().ceil() as u32).min(frame.height());
    let width = x1.saturating_sub(x0);
    let height = y1.saturating_sub(y0);

    if width < MIN_CROP_SIDE || height < MIN_CROP_SIDE {
        return Err(InvalidCropError { width, height });
    }

    Ok(frame.crop(x0, y0, width, height).fit_within(max_dimension))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn frame(width: u32, height: u32) -> Frame {
        Frame::new(vec![90u8; (width * height * 3) as usize], width, height, 3, 0)
    }

    #[test]
    fn test_padding_grows_crop() {
        let crop = crop_face(
            &frame(200, 200),
            &BoundingBox::new(50.0, 50.0, 50.0, 50.0),
            0.2,
            1000,
        )
        .unwrap();
        assert_eq!((crop.width(), crop.height()), (70, 70));
    }

    #[test]
    fn test_crop_is_clamped_to_frame() {
        let crop = crop_face(
            &frame(100, 80),
            &BoundingBox::new(-20.0, 60.0, 60.0, 60.0),
            0.2,
            1000,
        )
        .unwrap();
        assert_eq!((crop.width(), crop.height()), (52, 32));
    }

    #[test]
    fn test_large_crop_is_downscaled() {
        let crop = crop_face(
            &frame(1000, 800),
            &BoundingBox::new(100.0, 100.0, 500.0, 400.0),
            0.0,
            320,
        )
        .unwrap();
        assert_eq!((crop.width(), crop.height()), (320, 256));
    }

    #[rstest]
    #[case(BoundingBox::new(500.0, 500.0, 40.0, 40.0))]
    #[case(BoundingBox::new(10.0, 10.0, 0.0, 0.0))]
    #[case(BoundingBox::new(-100.0, -100.0, 20.0, 20.0))]
    fn test_degenerate_boxes_are_rejected(#[case] bbox: BoundingBox) {
        assert!(crop_face(&frame(100, 100), &bbox, 0.2, 320).is_err());
    }
}
