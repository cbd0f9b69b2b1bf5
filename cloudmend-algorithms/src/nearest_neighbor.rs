//! Nearest neighbor search implementations

use cloudmend_core::{Error, HasPosition, NearestNeighborSearch, Point3f, PointCloud, Result};
use nalgebra::distance_squared;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tracing::debug;

/// Ranges at or below this size are scanned linearly instead of split further
const LEAF_SIZE: usize = 8;

/// A neighbor candidate ordered by (squared distance, point index)
#[derive(Debug, Clone, Copy)]
struct Candidate {
    dist2: f32,
    index: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist2
            .total_cmp(&other.dist2)
            .then(self.index.cmp(&other.index))
    }
}

/// Balanced KD-Tree for nearest neighbor search
///
/// The tree is stored implicitly: `order` is a permutation of the point
/// indices in which every subtree covers a contiguous range, with the
/// subtree's splitting point at the middle of the range. `axes` holds the
/// split axis for each such middle position.
///
/// The tree is immutable once built. Rebuild it if the points change.
pub struct KdTree {
    points: Vec<Point3f>,
    order: Vec<usize>,
    axes: Vec<u8>,
}

impl KdTree {
    /// Build a tree over `points`. Coordinates must be finite.
    pub fn new(points: &[Point3f]) -> Result<Self> {
        if let Some(idx) = points
            .iter()
            .position(|p| !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite()))
        {
            return Err(Error::InvalidInput(format!(
                "point {} has non-finite coordinates",
                idx
            )));
        }

        let mut tree = Self {
            points: points.to_vec(),
            order: (0..points.len()).collect(),
            axes: vec![0; points.len()],
        };
        tree.build(0, points.len());
        debug!(points = points.len(), "built kd-tree");
        Ok(tree)
    }

    /// Build a tree over the positions of a cloud
    pub fn from_cloud<T: HasPosition>(cloud: &PointCloud<T>) -> Result<Self> {
        Self::new(&cloud.positions())
    }

    /// Indexed points, in their original order
    pub fn points(&self) -> &[Point3f] {
        &self.points
    }

    fn build(&mut self, lo: usize, hi: usize) {
        if hi - lo <= LEAF_SIZE {
            return;
        }

        let axis = self.widest_axis(lo, hi);
        let mid = lo + (hi - lo) / 2;
        let points = &self.points;
        self.order[lo..hi].select_nth_unstable_by(mid - lo, |&a, &b| {
            points[a][axis]
                .total_cmp(&points[b][axis])
                .then(a.cmp(&b))
        });
        self.axes[mid] = axis as u8;

        self.build(lo, mid);
        self.build(mid + 1, hi);
    }

    /// Axis with the largest coordinate spread over `order[lo..hi]`
    fn widest_axis(&self, lo: usize, hi: usize) -> usize {
        let mut min = [f32::INFINITY; 3];
        let mut max = [f32::NEG_INFINITY; 3];
        for &idx in &self.order[lo..hi] {
            let p = &self.points[idx];
            for axis in 0..3 {
                min[axis] = min[axis].min(p[axis]);
                max[axis] = max[axis].max(p[axis]);
            }
        }

        (0..3)
            .max_by(|&a, &b| (max[a] - min[a]).total_cmp(&(max[b] - min[b])))
            .unwrap_or(0)
    }

    fn offer(&self, index: usize, query: &Point3f, k: usize, heap: &mut BinaryHeap<Candidate>) {
        let candidate = Candidate {
            dist2: distance_squared(&self.points[index], query),
            index,
        };
        if heap.len() < k {
            heap.push(candidate);
        } else if heap.peek().is_some_and(|worst| candidate < *worst) {
            heap.pop();
            heap.push(candidate);
        }
    }

    fn search_knn(
        &self,
        lo: usize,
        hi: usize,
        query: &Point3f,
        k: usize,
        heap: &mut BinaryHeap<Candidate>,
    ) {
        if hi - lo <= LEAF_SIZE {
            for &idx in &self.order[lo..hi] {
                self.offer(idx, query, k, heap);
            }
            return;
        }

        let mid = lo + (hi - lo) / 2;
        let axis = self.axes[mid] as usize;
        let split = self.order[mid];
        let diff = query[axis] - self.points[split][axis];
        self.offer(split, query, k, heap);

        let (near, far) = if diff < 0.0 {
            ((lo, mid), (mid + 1, hi))
        } else {
            ((mid + 1, hi), (lo, mid))
        };

        self.search_knn(near.0, near.1, query, k, heap);

        // Equal distances must still be visited so lower indices can win ties
        let worst = if heap.len() < k {
            f32::INFINITY
        } else {
            heap.peek().map_or(f32::INFINITY, |c| c.dist2)
        };
        if diff * diff <= worst {
            self.search_knn(far.0, far.1, query, k, heap);
        }
    }

    fn search_radius(
        &self,
        lo: usize,
        hi: usize,
        query: &Point3f,
        radius2: f32,
        found: &mut Vec<Candidate>,
    ) {
        if hi - lo <= LEAF_SIZE {
            for &idx in &self.order[lo..hi] {
                let dist2 = distance_squared(&self.points[idx], query);
                if dist2 <= radius2 {
                    found.push(Candidate { dist2, index: idx });
                }
            }
            return;
        }

        let mid = lo + (hi - lo) / 2;
        let axis = self.axes[mid] as usize;
        let split = self.order[mid];
        let diff = query[axis] - self.points[split][axis];

        let dist2 = distance_squared(&self.points[split], query);
        if dist2 <= radius2 {
            found.push(Candidate { dist2, index: split });
        }

        if diff <= 0.0 || diff * diff <= radius2 {
            self.search_radius(lo, mid, query, radius2, found);
        }
        if diff >= 0.0 || diff * diff <= radius2 {
            self.search_radius(mid + 1, hi, query, radius2, found);
        }
    }
}

fn is_finite_query(query: &Point3f) -> bool {
    query.x.is_finite() && query.y.is_finite() && query.z.is_finite()
}

fn into_results(candidates: impl IntoIterator<Item = Candidate>) -> Vec<(usize, f32)> {
    candidates
        .into_iter()
        .map(|c| (c.index, c.dist2.sqrt()))
        .collect()
}

impl NearestNeighborSearch for KdTree {
    fn find_k_nearest(&self, query: &Point3f, k: usize) -> Vec<(usize, f32)> {
        if k == 0 || self.points.is_empty() || !is_finite_query(query) {
            return Vec::new();
        }

        let mut heap = BinaryHeap::with_capacity(k.min(self.points.len()) + 1);
        self.search_knn(0, self.points.len(), query, k, &mut heap);
        into_results(heap.into_sorted_vec())
    }

    fn find_radius_neighbors(&self, query: &Point3f, radius: f32) -> Vec<(usize, f32)> {
        if radius < 0.0 || self.points.is_empty() || !is_finite_query(query) {
            return Vec::new();
        }

        let mut found = Vec::new();
        self.search_radius(0, self.points.len(), query, radius * radius, &mut found);
        found.sort_unstable();
        into_results(found)
    }

    fn len(&self) -> usize {
        self.points.len()
    }
}

/// Simple brute force nearest neighbor search for small datasets
pub struct BruteForceSearch {
    points: Vec<Point3f>,
}

impl BruteForceSearch {
    pub fn new(points: &[Point3f]) -> Self {
        Self {
            points: points.to_vec(),
        }
    }
}

impl NearestNeighborSearch for BruteForceSearch {
    fn find_k_nearest(&self, query: &Point3f, k: usize) -> Vec<(usize, f32)> {
        let mut candidates: Vec<Candidate> = self
            .points
            .iter()
            .enumerate()
            .map(|(index, point)| Candidate {
                dist2: distance_squared(point, query),
                index,
            })
            .collect();

        candidates.sort_unstable();
        candidates.truncate(k);
        into_results(candidates)
    }

    fn find_radius_neighbors(&self, query: &Point3f, radius: f32) -> Vec<(usize, f32)> {
        if radius < 0.0 {
            return Vec::new();
        }
        let radius2 = radius * radius;
        let mut found: Vec<Candidate> = self
            .points
            .iter()
            .enumerate()
            .map(|(index, point)| Candidate {
                dist2: distance_squared(point, query),
                index,
            })
            .filter(|c| c.dist2 <= radius2)
            .collect();

        found.sort_unstable();
        into_results(found)
    }

    fn len(&self) -> usize {
        self.points.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Points on the x axis with known pairwise distances
    fn line_points() -> Vec<Point3f> {
        [0.0, 1.0, 3.0, 6.0, 10.0, -1.0, -3.0, 15.0, 21.0, 28.0, 2.0, -6.0]
            .iter()
            .map(|&x| Point3f::new(x, 0.0, 0.0))
            .collect()
    }

    fn indices(results: &[(usize, f32)]) -> Vec<usize> {
        results.iter().map(|&(idx, _)| idx).collect()
    }

    #[test]
    fn test_knn_exact_neighbors() {
        let tree = KdTree::new(&line_points()).unwrap();
        let result = tree.find_k_nearest(&Point3f::new(2.6, 0.0, 0.0), 3);

        // 3.0 (0.4), 2.0 (0.6), 1.0 (1.6)
        assert_eq!(indices(&result), vec![2, 10, 1]);
        assert_relative_eq!(result[0].1, 0.4, epsilon = 1e-5);
        assert_relative_eq!(result[1].1, 0.6, epsilon = 1e-5);
        assert_relative_eq!(result[2].1, 1.6, epsilon = 1e-5);
    }

    #[test]
    fn test_knn_ties_follow_point_order() {
        let tree = KdTree::new(&line_points()).unwrap();
        // From the origin: 0 at 0, then 1.0 and -1.0 both at distance 1,
        // then 2.0 at 2, then 3.0 and -3.0 both at distance 3
        let result = tree.find_k_nearest(&Point3f::origin(), 6);
        assert_eq!(indices(&result), vec![0, 1, 5, 10, 2, 6]);

        // Cutting through a tie keeps the lower index
        let result = tree.find_k_nearest(&Point3f::origin(), 2);
        assert_eq!(indices(&result), vec![0, 1]);
    }

    #[test]
    fn test_knn_with_more_neighbors_than_points() {
        let points = line_points();
        let tree = KdTree::new(&points).unwrap();
        let result = tree.find_k_nearest(&Point3f::new(100.0, 0.0, 0.0), 50);
        assert_eq!(result.len(), points.len());
        assert!(result.windows(2).all(|w| w[0].1 <= w[1].1));
        assert_eq!(result[0].0, 9);
    }

    #[test]
    fn test_radius_exact_neighbors() {
        let tree = KdTree::new(&line_points()).unwrap();
        let result = tree.find_radius_neighbors(&Point3f::new(0.5, 0.0, 0.0), 2.5);
        // 0 (0.5), 1 (0.5), 2.0 (1.5), -1 (1.5), 3.0 (2.5)
        assert_eq!(indices(&result), vec![0, 1, 5, 10, 2]);
        assert!(result.iter().all(|&(_, d)| d <= 2.5));
    }

    #[test]
    fn test_radius_query_in_3d() {
        let points = vec![
            Point3f::new(0.0, 0.0, 0.0),
            Point3f::new(1.0, 0.0, 0.0),
            Point3f::new(0.0, 1.0, 0.0),
            Point3f::new(0.0, 0.0, 1.0),
            Point3f::new(1.0, 1.0, 1.0),
            Point3f::new(2.0, 2.0, 2.0),
        ];
        let tree = KdTree::new(&points).unwrap();
        let result = tree.find_radius_neighbors(&Point3f::origin(), 1.0);
        assert_eq!(indices(&result), vec![0, 1, 2, 3]);

        let result = tree.find_radius_neighbors(&Point3f::origin(), 1.8);
        assert_eq!(indices(&result), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_empty_tree_and_degenerate_queries() {
        let tree = KdTree::new(&[]).unwrap();
        assert!(tree.is_empty());
        assert!(tree.find_k_nearest(&Point3f::origin(), 3).is_empty());
        assert!(tree.find_radius_neighbors(&Point3f::origin(), 1.0).is_empty());

        let tree = KdTree::new(&line_points()).unwrap();
        assert!(tree.find_k_nearest(&Point3f::origin(), 0).is_empty());
        assert!(tree.find_radius_neighbors(&Point3f::origin(), -1.0).is_empty());
        assert!(tree
            .find_k_nearest(&Point3f::new(f32::NAN, 0.0, 0.0), 3)
            .is_empty());
    }

    #[test]
    fn test_non_finite_points_rejected() {
        let points = vec![Point3f::origin(), Point3f::new(f32::INFINITY, 0.0, 0.0)];
        assert!(matches!(KdTree::new(&points), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_kdtree_matches_brute_force() {
        let mut rng = StdRng::seed_from_u64(7);
        // Coarse coordinates produce plenty of duplicate positions and ties
        let points: Vec<Point3f> = (0..2000)
            .map(|_| {
                Point3f::new(
                    rng.gen_range(0..20) as f32 * 0.5,
                    rng.gen_range(0..20) as f32 * 0.5,
                    rng.gen_range(0..5) as f32 * 0.5,
                )
            })
            .collect();

        let tree = KdTree::new(&points).unwrap();
        let brute = BruteForceSearch::new(&points);

        for _ in 0..100 {
            let query = Point3f::new(
                rng.gen_range(-1.0..11.0),
                rng.gen_range(-1.0..11.0),
                rng.gen_range(-1.0..3.0),
            );
            let k = rng.gen_range(1..40);
            assert_eq!(
                tree.find_k_nearest(&query, k),
                brute.find_k_nearest(&query, k)
            );

            let radius = rng.gen_range(0.0..2.0);
            assert_eq!(
                tree.find_radius_neighbors(&query, radius),
                brute.find_radius_neighbors(&query, radius)
            );
        }

        // Queries exactly on indexed points
        for point in points.iter().step_by(97) {
            assert_eq!(
                tree.find_k_nearest(point, 12),
                brute.find_k_nearest(point, 12)
            );
        }
    }
}
