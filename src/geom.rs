//!
//! # Geometry Module
//!
//! Defines the core geometric types: [Point], [BoundBox], the eight-code
//! rigid-motion [Orientation], and the affine [Transform], along with
//! tolerance-based coordinate rounding.
//!

// Crates.io
use serde::{Deserialize, Serialize};

// Local imports
use crate::error::{StackError, StackResult};

/// # Location Integer Type-Alias
///
/// Used for all database-unit spatial coordinates.
/// Designed for quickly swapping to other integer types, if we so desire.
///
pub type Int = i64;

/// # Point in two-dimensional layout-space
#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Point {
    pub x: Int,
    pub y: Int,
}
impl Point {
    /// Create a new [Point] from (x,y) coordinates
    pub fn new(x: Int, y: Int) -> Self {
        Self { x, y }
    }
    /// Create a new [Point], transformed from our original location by `trans`.
    /// Coordinate transforms are applied in floating-point format,
    /// largely for rotations, and then rounded to the nearest integer.
    pub fn transform(&self, trans: &Transform) -> Point {
        let xf = self.x as f64;
        let yf = self.y as f64;
        let x = trans.a[0][0] * xf + trans.a[0][1] * yf + trans.b[0];
        let y = trans.a[1][0] * xf + trans.a[1][1] * yf + trans.b[1];
        Self {
            x: x.round() as Int,
            y: y.round() as Int,
        }
    }
}

/// # Axis-Aligned Rectangular Bounding Box
///
/// Stored as its lower-left and upper-right corner [Point]s,
/// kept normalized (`p0 <= p1` in both dimensions) by construction.
///
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct BoundBox {
    pub p0: Point,
    pub p1: Point,
}
impl BoundBox {
    /// Create a normalized [BoundBox] from any two corner points
    pub fn new(p0: Point, p1: Point) -> Self {
        Self {
            p0: Point::new(p0.x.min(p1.x), p0.y.min(p1.y)),
            p1: Point::new(p0.x.max(p1.x), p0.y.max(p1.y)),
        }
    }
    /// Create the [BoundBox] surrounding point-vector `pts`.
    /// Returns `None` for an empty vector.
    pub fn of_points(pts: &[Point]) -> Option<Self> {
        let first = pts.first()?;
        let mut bbox = BoundBox::new(*first, *first);
        for pt in &pts[1..] {
            bbox.p0.x = bbox.p0.x.min(pt.x);
            bbox.p0.y = bbox.p0.y.min(pt.y);
            bbox.p1.x = bbox.p1.x.max(pt.x);
            bbox.p1.y = bbox.p1.y.max(pt.y);
        }
        Some(bbox)
    }
    /// Boolean indication of whether we contain point `pt`.
    /// Containment is inclusive of the box boundary.
    pub fn contains(&self, pt: &Point) -> bool {
        self.p0.x <= pt.x && self.p1.x >= pt.x && self.p0.y <= pt.y && self.p1.y >= pt.y
    }
    /// Width and height, as a (dx, dy) pair
    pub fn size(&self) -> (Int, Int) {
        (self.p1.x - self.p0.x, self.p1.y - self.p0.y)
    }
    /// Create a new [BoundBox] with both corners passed through `trans`,
    /// re-normalizing afterward (rotations and mirrors swap corners).
    pub fn transform(&self, trans: &Transform) -> Self {
        Self::new(self.p0.transform(trans), self.p1.transform(trans))
    }
}

///
/// # Placement Orientation
///
/// The eight rigid motions available to a placed cell or chip:
/// four rotations, and the four rotations following a reflection.
/// Named in the reflect-then-rotate convention common to layout tooling:
/// `MX` reflects about the x-axis, `MXR90` reflects then rotates 90 degrees
/// counter-clockwise, and so on.
///
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Orientation {
    #[default]
    R0,
    R90,
    R180,
    R270,
    MX,
    MXR90,
    MY,
    MYR90,
}
impl Orientation {
    /// All eight codes, in declaration order
    pub const ALL: [Orientation; 8] = [
        Orientation::R0,
        Orientation::R90,
        Orientation::R180,
        Orientation::R270,
        Orientation::MX,
        Orientation::MXR90,
        Orientation::MY,
        Orientation::MYR90,
    ];
    /// The 2x2 integer rotation/reflection matrix, in row-major order,
    /// applied to column-vector points.
    pub fn matrix(&self) -> [[i8; 2]; 2] {
        match self {
            Orientation::R0 => [[1, 0], [0, 1]],
            Orientation::R90 => [[0, -1], [1, 0]],
            Orientation::R180 => [[-1, 0], [0, -1]],
            Orientation::R270 => [[0, 1], [-1, 0]],
            Orientation::MX => [[1, 0], [0, -1]],
            Orientation::MXR90 => [[0, 1], [1, 0]],
            Orientation::MY => [[-1, 0], [0, 1]],
            Orientation::MYR90 => [[0, -1], [-1, 0]],
        }
    }
    /// Decode a 2x2 integer matrix back to its [Orientation].
    /// Returns `None` for anything outside the eight rigid motions.
    fn from_matrix(mat: [[i8; 2]; 2]) -> Option<Self> {
        Self::ALL.into_iter().find(|o| o.matrix() == mat)
    }
    /// Compose a parent placement with a nested child placement.
    /// The child's motion is applied first, then our own.
    /// The eight codes are closed under composition.
    pub fn cascade(&self, child: Orientation) -> Orientation {
        let p = self.matrix();
        let c = child.matrix();
        let mut mat = [[0i8; 2]; 2];
        for i in 0..2 {
            for j in 0..2 {
                mat[i][j] = p[i][0] * c[0][j] + p[i][1] * c[1][j];
            }
        }
        // The product of two signed permutation matrices is another; always decodes.
        Self::from_matrix(mat).unwrap()
    }
    /// Signed winding indicator: the sign of our determinant.
    /// `+1` for the pure rotations, `-1` for the mirrored codes.
    pub fn winding(&self) -> i8 {
        let m = self.matrix();
        m[0][0] * m[1][1] - m[0][1] * m[1][0]
    }
    /// Decode a [gds21::GdsStrans] into an [Orientation].
    ///
    /// GDSII expresses placement as an optional x-axis reflection applied
    /// before a counter-clockwise rotation. Only the four axis-aligned
    /// angles are representable; magnification and the "absolute" settings
    /// are not supported.
    pub fn from_strans(strans: &Option<gds21::GdsStrans>) -> StackResult<Self> {
        let strans = match strans {
            None => return Ok(Orientation::R0),
            Some(s) => s,
        };
        if s_invalid(strans) {
            return Err(StackError::msg(format!(
                "Unsupported strans settings: {:?}",
                strans
            )));
        }
        let angle = strans.angle.unwrap_or(0.0);
        let rv = match (strans.reflected, angle) {
            (false, a) if a == 0.0 => Orientation::R0,
            (false, a) if a == 90.0 => Orientation::R90,
            (false, a) if a == 180.0 => Orientation::R180,
            (false, a) if a == 270.0 => Orientation::R270,
            (true, a) if a == 0.0 => Orientation::MX,
            (true, a) if a == 90.0 => Orientation::MXR90,
            (true, a) if a == 180.0 => Orientation::MY,
            (true, a) if a == 270.0 => Orientation::MYR90,
            _ => {
                return Err(StackError::msg(format!(
                    "Invalid placement angle: {}",
                    angle
                )))
            }
        };
        Ok(rv)
    }
}
impl std::fmt::Display for Orientation {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
/// Boolean indication of strans settings we do not support:
/// absolute magnification/angle flags, and any non-unit magnification.
fn s_invalid(s: &gds21::GdsStrans) -> bool {
    s.abs_mag || s.abs_angle || matches!(s.mag, Some(m) if m != 1.0)
}

/// # Matrix-Vector Transformation
///
/// 2x2 rotation-matrix and two-entry translation vector,
/// used for relative movement of [Point]s and [BoundBox]es.
///
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Transform {
    /// Rotation / Reflection Matrix
    /// Represented in row-major order
    pub a: [[f64; 2]; 2],
    /// X-Y Translation
    pub b: [f64; 2],
}
impl Transform {
    /// The identity transform, leaving any transformed object unmodified
    pub fn identity() -> Self {
        Self {
            a: [[1., 0.], [0., 1.]],
            b: [0., 0.],
        }
    }
    /// Translation by (x,y)
    pub fn translate(x: f64, y: f64) -> Self {
        Self {
            a: [[1., 0.], [0., 1.]],
            b: [x, y],
        }
    }
    /// Create a transform from placement fields:
    /// rigid `orientation` applied first, then uniform scaling by `scale`,
    /// then translation by `(x, y)`.
    pub fn from_placement(orientation: Orientation, x: f64, y: f64, scale: f64) -> Self {
        let m = orientation.matrix();
        let a = [
            [scale * m[0][0] as f64, scale * m[0][1] as f64],
            [scale * m[1][0] as f64, scale * m[1][1] as f64],
        ];
        Self { a, b: [x, y] }
    }
    /// Create a new [Transform] that is the cascade of `parent` and `child`.
    ///
    /// "Parents" and "children" refer to typical layout-instance hierarchies,
    /// in which each level of instance has a nested set of transformations relative to its top-level parent.
    ///
    /// Note this operation *is not* commutative.
    pub fn cascade(parent: &Transform, child: &Transform) -> Transform {
        // The result-transform's origin is the parent's origin,
        // plus the parent-transformed child's origin
        let mut b = matvec(&parent.a, &child.b);
        b[0] += parent.b[0];
        b[1] += parent.b[1];
        // And the cascade-matrix is the product of the parent's and child's
        let a = matmul(&parent.a, &child.a);
        Self { a, b }
    }
    /// Apply to raw floating-point coordinates, without rounding
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a[0][0] * x + self.a[0][1] * y + self.b[0],
            self.a[1][0] * x + self.a[1][1] * y + self.b[1],
        )
    }
}
/// Multiply 2x2 matrices, returning a new 2x2 matrix
fn matmul(a: &[[f64; 2]; 2], b: &[[f64; 2]; 2]) -> [[f64; 2]; 2] {
    [
        [
            a[0][0] * b[0][0] + a[0][1] * b[1][0],
            a[0][0] * b[0][1] + a[0][1] * b[1][1],
        ],
        [
            a[1][0] * b[0][0] + a[1][1] * b[1][0],
            a[1][0] * b[0][1] + a[1][1] * b[1][1],
        ],
    ]
}
/// Multiply a 2x2 matrix by a 2-entry vector, returning a new 2-entry vector
fn matvec(a: &[[f64; 2]; 2], b: &[f64; 2]) -> [f64; 2] {
    [
        a[0][0] * b[0] + a[0][1] * b[1],
        a[1][0] * b[0] + a[1][1] * b[1],
    ]
}

/// Round `value` to an integer multiple of `tolerance`,
/// rounding halves away from zero.
///
/// The returned integer is the grouping key used throughout correlation:
/// two coordinates group together iff their keys are equal.
pub fn round_to(value: f64, tolerance: f64) -> i64 {
    (value / tolerance).round() as i64
}

/// Recover the display coordinate for grouping key `key` at `tolerance`
pub fn snap(key: i64, tolerance: f64) -> f64 {
    key as f64 * tolerance
}
