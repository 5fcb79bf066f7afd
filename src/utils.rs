use std::ops::{Add, Mul, Sub};

use crate::error::{MosaicError, Result};

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable, Debug, PartialEq)]
pub struct Vertex {
    pub position: [f32; 3],   // x, y, z world coordinates
    pub tex_coords: [f32; 2], // u, v texture coordinates
}

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable, PartialEq)]
pub struct TransformUniform {
    pub transform: [[f32; 4]; 4], // 4x4 transformation matrix, column-major
}

impl TransformUniform {
    pub const IDENTITY: Self = Self {
        transform: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    };

    /// Orthographic projection mapping `viewport` (world space, y up) onto
    /// clip space `[-1, 1]²`.
    pub fn orthographic(viewport: Rectangle) -> Self {
        let center = viewport.center();
        let sx = 2.0 / viewport.w();
        let sy = 2.0 / viewport.h();
        Self {
            transform: [
                [sx, 0.0, 0.0, 0.0],
                [0.0, sy, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [-center.x * sx, -center.y * sy, 0.0, 1.0],
            ],
        }
    }

    /// Applies the matrix to a 2D point, returning clip-space x/y.
    pub fn apply(&self, p: Point) -> Point {
        let m = &self.transform;
        Point {
            x: m[0][0] * p.x + m[1][0] * p.y + m[3][0],
            y: m[0][1] * p.x + m[1][1] * p.y + m[3][1],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn aspect(&self) -> f32 {
        self.width / self.height
    }
}

impl Mul<f32> for Size {
    type Output = Size;

    fn mul(self, rhs: f32) -> Self::Output {
        Size {
            width: self.width * rhs,
            height: self.height * rhs,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn translate(self, dx: f32, dy: f32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }

    pub fn scale(self, sx: f32, sy: f32) -> Self {
        Self {
            x: self.x * sx,
            y: self.y * sy,
        }
    }
}

impl Add for Point {
    type Output = Point;
    fn add(self, rhs: Point) -> Self::Output {
        self.translate(rhs.x, rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;
    fn sub(self, rhs: Point) -> Self::Output {
        self.translate(-rhs.x, -rhs.y)
    }
}

impl Mul<f32> for Point {
    type Output = Point;
    fn mul(self, factor: f32) -> Self::Output {
        self.scale(factor, factor)
    }
}

/// Axis-aligned rectangle with strictly positive extent.
///
/// Rectangles are values: every operation returns a new one, and the
/// positive-extent invariant is checked on construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rectangle {
    x: f32,
    y: f32,
    w: f32,
    h: f32,
}

impl Rectangle {
    /// Panics when `w` or `h` is not strictly positive; a rectangle like that
    /// can only come from a broken layout upstream.
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        assert!(w > 0.0, "Rectangle width has to be positive, got {w}");
        assert!(h > 0.0, "Rectangle height has to be positive, got {h}");
        Self { x, y, w, h }
    }

    pub fn try_new(x: f32, y: f32, w: f32, h: f32) -> Result<Self> {
        if w > 0.0 && h > 0.0 {
            Ok(Self { x, y, w, h })
        } else {
            Err(MosaicError::InvalidRectangle { w, h })
        }
    }

    pub fn from_center(center: Point, w: f32, h: f32) -> Self {
        Self::new(center.x - w / 2.0, center.y - h / 2.0, w, h)
    }

    pub fn from_opposite_corners(a: Point, b: Point) -> Self {
        Self::new(
            a.x.min(b.x),
            a.y.min(b.y),
            (a.x - b.x).abs(),
            (a.y - b.y).abs(),
        )
    }

    pub fn x(&self) -> f32 {
        self.x
    }

    pub fn y(&self) -> f32 {
        self.y
    }

    pub fn w(&self) -> f32 {
        self.w
    }

    pub fn h(&self) -> f32 {
        self.h
    }

    pub fn size(&self) -> Size {
        Size {
            width: self.w,
            height: self.h,
        }
    }

    pub fn area(&self) -> f32 {
        self.w * self.h
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    /// Corner with the smallest coordinates.
    pub fn base_point(&self) -> Point {
        Point::new(self.x, self.y)
    }

    /// Corner opposite to [`Rectangle::base_point`].
    pub fn offset_point(&self) -> Point {
        Point::new(self.x + self.w, self.y + self.h)
    }

    pub fn translate(&self, dx: f32, dy: f32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.w, self.h)
    }

    /// Scales position and extent, as a change of coordinate units would.
    pub fn scale(&self, sx: f32, sy: f32) -> Self {
        Self::new(self.x * sx, self.y * sy, self.w * sx, self.h * sy)
    }

    /// Open-interval overlap test: touching edges do not intersect.
    pub fn intersects(&self, other: &Rectangle) -> bool {
        self.x < other.x + other.w
            && other.x < self.x + self.w
            && self.y < other.y + other.h
            && other.y < self.y + self.h
    }

    /// Strict containment: `other` lies inside without touching any edge.
    pub fn contains(&self, other: &Rectangle) -> bool {
        self.x < other.x
            && other.x + other.w < self.x + self.w
            && self.y < other.y
            && other.y + other.h < self.y + self.h
    }

    /// Half-open containment `[x, x + w) × [y, y + h)`.
    pub fn contains_coord(&self, p: Point) -> bool {
        p.x >= self.x && p.x < self.x + self.w && p.y >= self.y && p.y < self.y + self.h
    }

    /// Smallest rectangle covering both.
    pub fn union(&self, other: &Rectangle) -> Self {
        let min_x = self.x.min(other.x);
        let min_y = self.y.min(other.y);
        let max_x = (self.x + self.w).max(other.x + other.w);
        let max_y = (self.y + self.h).max(other.y + other.h);
        Self::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    /// Bounding box of a set of rectangles, `None` for an empty set.
    pub fn bounding<'a, I>(rects: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Rectangle>,
    {
        rects.into_iter().fold(None, |acc, r| match acc {
            None => Some(*r),
            Some(b) => Some(b.union(r)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_new_rejects_non_positive_extent() {
        assert!(Rectangle::try_new(0.0, 0.0, 0.0, 1.0).is_err());
        assert!(Rectangle::try_new(0.0, 0.0, 1.0, -3.0).is_err());
        assert!(Rectangle::try_new(0.0, 0.0, f32::NAN, 1.0).is_err());
        assert!(Rectangle::try_new(-5.0, -5.0, 1.0, 1.0).is_ok());
    }

    #[test]
    #[should_panic(expected = "width has to be positive")]
    fn new_panics_on_zero_width() {
        let _ = Rectangle::new(1.0, 1.0, 0.0, 5.0);
    }

    #[test]
    #[should_panic(expected = "height has to be positive")]
    fn new_panics_on_negative_height() {
        let _ = Rectangle::new(1.0, 1.0, 5.0, -1.0);
    }

    #[test]
    fn intersects_is_open_interval() {
        let a = Rectangle::new(0.0, 0.0, 10.0, 10.0);
        let touching = Rectangle::new(10.0, 0.0, 10.0, 10.0);
        let overlapping = Rectangle::new(9.5, 9.5, 10.0, 10.0);
        assert!(!a.intersects(&touching));
        assert!(a.intersects(&overlapping));
        assert!(overlapping.intersects(&a));
    }

    #[test]
    fn contains_is_strict() {
        let outer = Rectangle::new(0.0, 0.0, 10.0, 10.0);
        assert!(outer.contains(&Rectangle::new(1.0, 1.0, 8.0, 8.0)));
        assert!(!outer.contains(&Rectangle::new(0.0, 1.0, 8.0, 8.0)));
        assert!(!outer.contains(&outer));
    }

    #[test]
    fn opposite_corners_normalise_order() {
        let r = Rectangle::from_opposite_corners(Point::new(10.0, 2.0), Point::new(4.0, 8.0));
        assert_eq!(r, Rectangle::new(4.0, 2.0, 6.0, 6.0));
        assert_eq!(r.offset_point(), Point::new(10.0, 8.0));
    }

    #[test]
    fn orthographic_maps_viewport_corners_to_clip_space() {
        let viewport = Rectangle::new(100.0, 50.0, 200.0, 100.0);
        let m = TransformUniform::orthographic(viewport);
        let lo = m.apply(viewport.base_point());
        let hi = m.apply(viewport.offset_point());
        assert!((lo.x + 1.0).abs() < 1e-5 && (lo.y + 1.0).abs() < 1e-5);
        assert!((hi.x - 1.0).abs() < 1e-5 && (hi.y - 1.0).abs() < 1e-5);
        let c = m.apply(viewport.center());
        assert!(c.x.abs() < 1e-5 && c.y.abs() < 1e-5);
    }

    #[test]
    fn bounding_covers_all() {
        let rects = [
            Rectangle::new(0.0, 0.0, 1.0, 1.0),
            Rectangle::new(5.0, -2.0, 1.0, 1.0),
        ];
        let b = Rectangle::bounding(rects.iter()).unwrap();
        assert_eq!(b, Rectangle::new(0.0, -2.0, 6.0, 3.0));
        assert!(Rectangle::bounding(std::iter::empty()).is_none());
    }
}
