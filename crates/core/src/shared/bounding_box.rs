use serde::{Deserialize, Serialize};

/// Axis-aligned box in a stream's pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Builds a box from `[x1, y1, x2, y2]` corners.
    pub fn from_corners(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self::new(x1, y1, x2 - x1, y2 - y1)
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection-over-Union; 0 for disjoint or degenerate boxes.
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let ix1 = self.x.max(other.x);
        let iy1 = self.y.max(other.y);
        let ix2 = self.right().min(other.right());
        let iy2 = self.bottom().min(other.bottom());

        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        if inter == 0.0 {
            return 0.0;
        }
        inter / (self.area() + other.area() - inter)
    }

    /// Grows the box by `fraction` of its size on every side.
    pub fn padded(&self, fraction: f64) -> BoundingBox {
        let dx = self.width * fraction;
        let dy = self.height * fraction;
        BoundingBox::new(
            self.x - dx,
            self.y - dy,
            self.width + 2.0 * dx,
            self.height + 2.0 * dy,
        )
    }

    /// Intersects the box with the `[0, width] x [0, height]` frame.
    /// The result may have zero area when the box lies outside the frame.
    pub fn clamped(&self, frame_width: u32, frame_height: u32) -> BoundingBox {
        let x1 = self.x.clamp(0.0, frame_width as f64);
        let y1 = self.y.clamp(0.0, frame_height as f64);
        let x2 = self.right().clamp(0.0, frame_width as f64);
        let y2 = self.bottom().clamp(0.0, frame_height as f64);
        BoundingBox::from_corners(x1, y1, x2.max(x1), y2.max(y1))
    }
}
