//! Point cloud data structures and functionality

use crate::error::{Error, Result};
use crate::point::*;
use crate::traits::HasPosition;
use serde::{Deserialize, Serialize};
use std::ops::Index;

/// A generic point cloud container
///
/// Storage order carries no meaning for the algorithms but is preserved by
/// every stage so runs are reproducible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointCloud<T> {
    pub points: Vec<T>,
}

/// A point cloud with bare positions
pub type PointCloud3f = PointCloud<Point3f>;

/// A point cloud whose points may carry color and normals
pub type AttributedPointCloud = PointCloud<CloudPoint>;

impl<T> PointCloud<T> {
    /// Create a new empty point cloud
    pub fn new() -> Self {
        Self {
            points: Vec::new(),
        }
    }

    /// Create a new point cloud with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: Vec::with_capacity(capacity),
        }
    }

    /// Create a point cloud from a vector of points
    pub fn from_points(points: Vec<T>) -> Self {
        Self { points }
    }

    /// Get the number of points in the cloud
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the point cloud is empty
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Add a point to the cloud
    pub fn push(&mut self, point: T) {
        self.points.push(point);
    }

    /// Get an iterator over the points
    pub fn iter(&self) -> std::slice::Iter<T> {
        self.points.iter()
    }
}

impl<T: HasPosition> PointCloud<T> {
    /// Snapshot of all positions, in storage order
    pub fn positions(&self) -> Vec<Point3f> {
        self.points.iter().map(HasPosition::position).collect()
    }
}

impl PointCloud<CloudPoint> {
    /// Create a cloud, rejecting points whose optional attributes differ
    /// from the first point's.
    pub fn try_from_points(points: Vec<CloudPoint>) -> Result<Self> {
        let cloud = Self::from_points(points);
        cloud.validate_schema()?;
        Ok(cloud)
    }

    /// Attribute layout shared by every point. An empty cloud has none.
    pub fn schema(&self) -> PointSchema {
        self.points
            .first()
            .map(CloudPoint::schema)
            .unwrap_or_default()
    }

    /// Check that all points carry the same optional attributes
    pub fn validate_schema(&self) -> Result<()> {
        let expected = self.schema();
        match self.points.iter().position(|p| p.schema() != expected) {
            Some(idx) => Err(Error::InvalidInput(format!(
                "point {} has attributes {:?}, expected {:?}",
                idx,
                self.points[idx].schema(),
                expected
            ))),
            None => Ok(()),
        }
    }
}

impl From<PointCloud<Point3f>> for PointCloud<CloudPoint> {
    fn from(cloud: PointCloud<Point3f>) -> Self {
        cloud.points.into_iter().map(CloudPoint::new).collect()
    }
}

impl<T> Default for PointCloud<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<usize> for PointCloud<T> {
    type Output = T;

    fn index(&self, index: usize) -> &Self::Output {
        &self.points[index]
    }
}

impl<T> IntoIterator for PointCloud<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a PointCloud<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

impl<T> Extend<T> for PointCloud<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.points.extend(iter);
    }
}

impl<T> FromIterator<T> for PointCloud<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            points: Vec::from_iter(iter),
        }
    }
}
