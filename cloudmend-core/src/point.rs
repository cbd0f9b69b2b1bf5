//! Point types and related functionality

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

/// A 3D point with floating point coordinates
pub type Point3f = Point3<f32>;

/// A 3D vector with floating point components
pub type Vector3f = Vector3<f32>;

/// RGB color with 8 bits per channel
pub type Rgb = [u8; 3];

/// A point as it flows through the pipeline: a position plus the optional
/// attributes a sensor or a previous stage attached to it.
///
/// Points are plain values. Stages build new points instead of mutating the
/// ones they were given.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CloudPoint {
    pub position: Point3f,
    pub color: Option<Rgb>,
    pub normal: Option<Vector3f>,
}

impl CloudPoint {
    /// Create a point without color or normal
    pub fn new(position: Point3f) -> Self {
        Self {
            position,
            color: None,
            normal: None,
        }
    }

    /// Create a point from raw coordinates
    pub fn from_xyz(x: f32, y: f32, z: f32) -> Self {
        Self::new(Point3f::new(x, y, z))
    }

    /// Create a colored point
    pub fn with_color(position: Point3f, color: Rgb) -> Self {
        Self {
            position,
            color: Some(color),
            normal: None,
        }
    }

    /// Return a copy of this point carrying the given normal
    pub fn with_normal(mut self, normal: Vector3f) -> Self {
        self.normal = Some(normal);
        self
    }

    /// Attribute layout of this point
    pub fn schema(&self) -> PointSchema {
        PointSchema {
            has_color: self.color.is_some(),
            has_normal: self.normal.is_some(),
        }
    }
}

impl Default for CloudPoint {
    fn default() -> Self {
        Self::new(Point3f::origin())
    }
}

impl From<Point3f> for CloudPoint {
    fn from(position: Point3f) -> Self {
        Self::new(position)
    }
}

/// Which optional attributes the points of a cloud carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PointSchema {
    pub has_color: bool,
    pub has_normal: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_follows_attributes() {
        let plain = CloudPoint::from_xyz(1.0, 2.0, 3.0);
        assert_eq!(plain.schema(), PointSchema::default());

        let colored = CloudPoint::with_color(Point3f::origin(), [10, 20, 30])
            .with_normal(Vector3f::z());
        assert_eq!(
            colored.schema(),
            PointSchema { has_color: true, has_normal: true }
        );
    }
}
