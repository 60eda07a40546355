//! Coordinate transforms and screen rectangles.
//!
//! Used on both sides of an assertion: tests compute the displacement they
//! expect from a configured transformation matrix, and the simulated input
//! pipeline applies the same matrix to injected deltas.

use serde::{Deserialize, Serialize};

/// A 3×3 row-major coordinate transform over homogeneous 2-D points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    m: [[f64; 3]; 3],
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    pub fn identity() -> Self {
        Self {
            m: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        }
    }

    pub fn translation(tx: f64, ty: f64) -> Self {
        Self {
            m: [[1.0, 0.0, tx], [0.0, 1.0, ty], [0.0, 0.0, 1.0]],
        }
    }

    /// Counter-clockwise rotation by `angle` radians.
    pub fn rotation(angle: f64) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self {
            m: [[cos, -sin, 0.0], [sin, cos, 0.0], [0.0, 0.0, 1.0]],
        }
    }

    pub fn scaling(sx: f64, sy: f64) -> Self {
        Self {
            m: [[sx, 0.0, 0.0], [0.0, sy, 0.0], [0.0, 0.0, 1.0]],
        }
    }

    /// Builds from the 9-element row-major form used by the device property.
    pub fn from_row_major(values: [f64; 9]) -> Self {
        Self {
            m: [
                [values[0], values[1], values[2]],
                [values[3], values[4], values[5]],
                [values[6], values[7], values[8]],
            ],
        }
    }

    /// The 9-element row-major form for the device property.
    pub fn to_row_major(&self) -> [f64; 9] {
        [
            self.m[0][0], self.m[0][1], self.m[0][2],
            self.m[1][0], self.m[1][1], self.m[1][2],
            self.m[2][0], self.m[2][1], self.m[2][2],
        ]
    }

    /// Applies the full transform to a point.
    pub fn apply_point(&self, x: f64, y: f64) -> (f64, f64) {
        let tx = self.m[0][0] * x + self.m[0][1] * y + self.m[0][2];
        let ty = self.m[1][0] * x + self.m[1][1] * y + self.m[1][2];
        let w = self.m[2][0] * x + self.m[2][1] * y + self.m[2][2];
        (tx / w, ty / w)
    }

    /// Applies only the linear part to a delta vector.  Relative motion is
    /// direction and magnitude; the translation column must not displace it.
    pub fn apply_delta(&self, dx: f64, dy: f64) -> (f64, f64) {
        (
            self.m[0][0] * dx + self.m[0][1] * dy,
            self.m[1][0] * dx + self.m[1][1] * dy,
        )
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }
}

/// A screen's extent in root-coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenRect {
    /// X of the top-left corner (may be negative for screens left of the
    /// origin screen).
    pub x: i32,
    /// Y of the top-left corner.
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl ScreenRect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Rightmost X coordinate (exclusive).
    pub fn right(&self) -> i32 {
        self.x + self.width as i32
    }

    /// Bottommost Y coordinate (exclusive).
    pub fn bottom(&self) -> i32 {
        self.y + self.height as i32
    }

    pub fn contains(&self, px: f64, py: f64) -> bool {
        px >= f64::from(self.x)
            && px < f64::from(self.right())
            && py >= f64::from(self.y)
            && py < f64::from(self.bottom())
    }

    /// Clamps a point to the screen's addressable pixels.
    pub fn clamp(&self, px: f64, py: f64) -> (f64, f64) {
        (
            px.clamp(f64::from(self.x), f64::from(self.right() - 1)),
            py.clamp(f64::from(self.y), f64::from(self.bottom() - 1)),
        )
    }
}
