use ndarray::{s, ArrayView3};

/// A single captured frame: contiguous RGB bytes in row-major order.
///
/// Format conversion happens at source boundaries only; detection,
/// tracking and quality code treat pixel data as opaque.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
    index: usize,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8, index: usize) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * (channels as usize),
            "data length must equal width * height * channels"
        );
        Self {
            data,
            width,
            height,
            channels,
            index,
        }
    }

    /// Wraps a decoded RGB image, taking ownership of its buffer.
    pub fn from_rgb_image(image: image::RgbImage, index: usize) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height, 3, index)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn as_ndarray(&self) -> ArrayView3<'_, u8> {
        ArrayView3::from_shape(self.shape(), &self.data)
            .expect("Frame data length must match dimensions")
    }

    /// Copies the `width` x `height` window whose top-left corner is
    /// `(x, y)`. The window must lie inside the frame.
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> Frame {
        debug_assert!(x + width <= self.width && y + height <= self.height);
        let (x, y) = (x as usize, y as usize);
        let (w, h) = (width as usize, height as usize);
        let data: Vec<u8> = self
            .as_ndarray()
            .slice(s![y..y + h, x..x + w, ..])
            .iter()
            .copied()
            .collect();
        Frame::new(data, width, height, self.channels, self.index)
    }

    /// Downscales so neither side exceeds `max_dimension`, keeping the
    /// aspect ratio. Frames already within bounds are returned as-is.
    pub fn fit_within(self, max_dimension: u32) -> Frame {
        let longest = self.width.max(self.height);
        if longest <= max_dimension || max_dimension == 0 || self.channels != 3 {
            return self;
        }
        let scale = max_dimension as f64 / longest as f64;
        let new_w = ((self.width as f64 * scale).round() as u32).max(1);
        let new_h = ((self.height as f64 * scale).round() as u32).max(1);
        let index = self.index;
        match self.to_rgb_image() {
            Some(img) => {
                let resized = image::imageops::resize(
                    &img,
                    new_w,
                    new_h,
                    image::imageops::FilterType::Triangle,
                );
                Frame::from_rgb_image(resized, index)
            }
            None => Frame::new(Vec::new(), 0, 0, 3, index),
        }
    }

    /// Borrows the pixels as an `image` buffer (RGB frames only).
    pub fn to_rgb_image(&self) -> Option<image::RgbImage> {
        if self.channels != 3 {
            return None;
        }
        image::RgbImage::from_raw(self.width, self.height, self.data.clone())
    }

    fn shape(&self) -> (usize, usize, usize) {
        (
            self.height as usize,
            self.width as usize,
            self.channels as usize,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 4x3 RGB frame where each pixel's red channel encodes `row * 10 + col`.
    fn numbered_frame() -> Frame {
        let mut data = Vec::new();
        for row in 0..3u8 {
            for col in 0..4u8 {
                data.extend_from_slice(&[row * 10 + col, 0, 0]);
            }
        }
        Frame::new(data, 4, 3, 3, 7)
    }

    #[test]
    fn test_construction_and_accessors() {
        let data = vec![0u8; 12]; // 2x2x3
        let frame = Frame::new(data.clone(), 2, 2, 3, 5);
        assert_eq!(frame.width(), 2);
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.channels(), 3);
        assert_eq!(frame.index(), 5);
        assert_eq!(frame.data(), &data[..]);
    }

    #[test]
    #[should_panic(expected = "data length must equal width * height * channels")]
    fn test_mismatched_data_length_panics_in_debug() {
        let data = vec![0u8; 10]; // wrong size for 2x2x3
        Frame::new(data, 2, 2, 3, 0);
    }

    #[test]
    fn test_as_ndarray_shape() {
        let frame = numbered_frame();
        assert_eq!(frame.as_ndarray().shape(), &[3, 4, 3]);
    }

    #[test]
    fn test_crop_copies_window() {
        let crop = numbered_frame().crop(1, 1, 2, 2);
        assert_eq!(crop.width(), 2);
        assert_eq!(crop.height(), 2);
        let reds: Vec<u8> = crop.data().chunks(3).map(|px| px[0]).collect();
        assert_eq!(reds, vec![11, 12, 21, 22]);
    }

    #[test]
    fn test_crop_keeps_frame_index() {
        assert_eq!(numbered_frame().crop(0, 0, 1, 1).index(), 7);
    }

    #[test]
    fn test_fit_within_downscales_longest_side() {
        let frame = Frame::new(vec![128u8; 400 * 200 * 3], 400, 200, 3, 0);
        let fitted = frame.fit_within(100);
        assert_eq!(fitted.width(), 100);
        assert_eq!(fitted.height(), 50);
        assert_eq!(fitted.data().len(), 100 * 50 * 3);
    }

    #[test]
    fn test_fit_within_leaves_small_frames_alone() {
        let frame = Frame::new(vec![1u8; 30 * 20 * 3], 30, 20, 3, 0);
        let fitted = frame.fit_within(100);
        assert_eq!((fitted.width(), fitted.height()), (30, 20));
    }

    #[test]
    fn test_rgb_image_roundtrip_preserves_pixels() {
        let frame = numbered_frame();
        let img = frame.to_rgb_image().unwrap();
        assert_eq!(img.get_pixel(2, 1).0, [12, 0, 0]);
        let back = Frame::from_rgb_image(img, 3);
        assert_eq!(back.data(), frame.data());
        assert_eq!(back.index(), 3);
    }

    #[test]
    fn test_to_rgb_image_rejects_non_rgb() {
        let gray = Frame::new(vec![0u8; 4], 2, 2, 1, 0);
        assert!(gray.to_rgb_image().is_none());
    }
}
