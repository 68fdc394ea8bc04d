/// Axis-aligned box in frame pixel coordinates (top-left origin).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Truncating conversion from float `[x1, y1, x2, y2]` corners.
    pub fn from_corners(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        let (x1, y1, x2, y2) = (x1 as i32, y1 as i32, x2 as i32, y2 as i32);
        Self::new(x1, y1, x2 - x1, y2 - y1)
    }

    pub fn corners(&self) -> [f64; 4] {
        [
            self.x as f64,
            self.y as f64,
            (self.x + self.width) as f64,
            (self.y + self.height) as f64,
        ]
    }

    pub fn area(&self) -> i64 {
        self.width.max(0) as i64 * self.height.max(0) as i64
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn center(&self) -> (f64, f64) {
        (
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }

    pub fn intersection(&self, other: &BBox) -> i64 {
        let ix1 = self.x.max(other.x);
        let iy1 = self.y.max(other.y);
        let ix2 = (self.x + self.width).min(other.x + other.width);
        let iy2 = (self.y + self.height).min(other.y + other.height);
        (ix2 - ix1).max(0) as i64 * (iy2 - iy1).max(0) as i64
    }

    pub fn iou(&self, other: &BBox) -> f64 {
        let inter = self.intersection(other) as f64;
        if inter == 0.0 {
            return 0.0;
        }
        let union = self.area() as f64 + other.area() as f64 - inter;
        if union <= 0.0 {
            return 0.0;
        }
        inter / union
    }

    pub fn offset(&self, dx: i32, dy: i32) -> BBox {
        BBox::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Intersects the box with a `width` x `height` frame.
    ///
    /// Returns `None` when the visible part is empty.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<BBox> {
        let x1 = self.x.max(0);
        let y1 = self.y.max(0);
        let x2 = (self.x + self.width).min(width as i32);
        let y2 = (self.y + self.height).min(height as i32);
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(BBox::new(x1, y1, x2 - x1, y2 - y1))
    }
}
