//! Core traits for cloudmend

use crate::point::*;

/// Trait for nearest neighbor search functionality
///
/// Results are `(index, distance)` pairs where `index` refers to the
/// position of the neighbor in the point set the index was built from.
/// Implementations are read-only after construction and must be safe to
/// query from several threads at once.
pub trait NearestNeighborSearch: Send + Sync {
    /// Find the k nearest neighbors to a query point, closest first.
    /// Equal distances are ordered by point index.
    fn find_k_nearest(&self, query: &Point3f, k: usize) -> Vec<(usize, f32)>;

    /// Find all neighbors within a given radius, closest first
    fn find_radius_neighbors(&self, query: &Point3f, radius: f32) -> Vec<(usize, f32)>;

    /// Number of indexed points
    fn len(&self) -> usize;

    /// Whether the index holds no points
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Anything that has a location in space
pub trait HasPosition {
    fn position(&self) -> Point3f;
}

impl HasPosition for Point3f {
    fn position(&self) -> Point3f {
        *self
    }
}

impl HasPosition for CloudPoint {
    fn position(&self) -> Point3f {
        self.position
    }
}
