// THEORY:
// Plain data containers shared by the detection layers. A `Candidate` is a
// connected region of a red mask described in the mask's own (local)
// coordinates; it knows how to derive its shape metrics but nothing about
// thresholds. A `StopLightBox` is a candidate that survived the geometric
// filter and was promoted into frame coordinates.

/// A 2D point in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

impl Point {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// A connected region of a color mask, before filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Number of mask pixels in the region, interior holes included.
    pub area: u32,
    /// Area of the convex hull around the region's pixel squares.
    pub hull_area: f64,
    /// Left edge of the bounding box, in mask coordinates.
    pub x: u32,
    /// Top edge of the bounding box, in mask coordinates.
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Candidate {
    /// `area / hull_area`, or `None` when the hull is degenerate.
    pub fn solidity(&self) -> Option<f64> {
        if self.hull_area > 0.0 {
            Some(self.area as f64 / self.hull_area)
        } else {
            None
        }
    }

    /// Width over height of the bounding box. Only meaningful for a non-empty box.
    pub fn aspect(&self) -> f64 {
        self.width as f64 / self.height as f64
    }

    /// Moves the candidate's box into frame coordinates.
    pub fn to_global(&self, offset_x: u32, offset_y: u32) -> StopLightBox {
        let x1 = offset_x + self.x;
        let y1 = offset_y + self.y;
        StopLightBox {
            x1,
            y1,
            x2: x1 + self.width,
            y2: y1 + self.height,
            area: self.area,
        }
    }
}

/// An accepted stop light, in frame coordinates. `x2`/`y2` are one past the
/// last covered pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StopLightBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
    /// Pixel area of the originating blob, kept for diagnostics.
    pub area: u32,
}

impl StopLightBox {
    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }
}
