//! Filtering algorithms

use crate::nearest_neighbor::KdTree;
use crate::parallel::{WorkerPool, WorkerPoolConfig};
use cloudmend_core::{
    Error, HasPosition, NearestNeighborSearch, PointCloud, ProcessingReport, Result,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Parameters of the statistical outlier filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierFilterConfig {
    /// Number of nearest neighbors used to score each point
    pub mean_k: usize,
    /// Multiplier on the global standard deviation of the scores
    pub std_dev_mul_thresh: f64,
    /// Return the rejected points instead of the retained ones
    pub negative: bool,
}

impl Default for OutlierFilterConfig {
    fn default() -> Self {
        Self {
            mean_k: 50,
            std_dev_mul_thresh: 1.0,
            negative: false,
        }
    }
}

impl OutlierFilterConfig {
    pub fn new(mean_k: usize, std_dev_mul_thresh: f64) -> Self {
        Self {
            mean_k,
            std_dev_mul_thresh,
            negative: false,
        }
    }

    /// Keep the outliers and drop everything else
    pub fn with_negative(mut self, negative: bool) -> Self {
        self.negative = negative;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.mean_k == 0 {
            return Err(Error::invalid_parameter("mean_k", "must be greater than 0"));
        }
        if !self.std_dev_mul_thresh.is_finite() || self.std_dev_mul_thresh < 0.0 {
            return Err(Error::invalid_parameter(
                "std_dev_mul_thresh",
                format!("must be finite and non-negative, got {}", self.std_dev_mul_thresh),
            ));
        }
        Ok(())
    }
}

/// Distribution of the per-point neighborhood scores
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutlierStatistics {
    /// Global mean of the mean neighbor distances
    pub mean: f64,
    /// Sample standard deviation of the mean neighbor distances
    pub std_dev: f64,
    /// Scores above this value are outliers
    pub threshold: f64,
    /// Neighbor count actually used after clamping
    pub effective_k: usize,
}

/// Output of the statistical outlier filter
#[derive(Debug, Clone)]
pub struct FilterResult<T> {
    /// Points that passed the filter, in input order
    pub cloud: PointCloud<T>,
    /// Input indices of the points in `cloud`
    pub indices: Vec<usize>,
    pub statistics: OutlierStatistics,
    pub report: ProcessingReport,
}

/// Statistical outlier removal
///
/// For each point, computes the mean distance to its k nearest neighbors.
/// Points whose mean distance exceeds `mean + std_dev_mul_thresh * std_dev`
/// of all scores are outliers and are removed.
#[derive(Debug, Clone)]
pub struct StatisticalOutlierFilter {
    config: OutlierFilterConfig,
}

impl StatisticalOutlierFilter {
    pub fn new(config: OutlierFilterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &OutlierFilterConfig {
        &self.config
    }

    /// Run the filter, spreading the per-point scoring over `pool`
    pub fn apply<T>(&self, cloud: &PointCloud<T>, pool: &WorkerPool) -> Result<FilterResult<T>>
    where
        T: HasPosition + Clone + Sync,
    {
        let mut report = ProcessingReport::new();

        // Without at least one neighbor per point there is nothing to compare
        if cloud.len() < 2 {
            return Ok(FilterResult {
                cloud: cloud.clone(),
                indices: (0..cloud.len()).collect(),
                statistics: OutlierStatistics::default(),
                report,
            });
        }

        let mut k = self.config.mean_k;
        if k >= cloud.len() {
            k = cloud.len() - 1;
            report.record_clamp("mean_k", self.config.mean_k as f64, k as f64);
        }

        let tree = KdTree::from_cloud(cloud)?;
        let scores = mean_neighbor_distances(&tree, k, pool);
        let statistics = score_statistics(&scores, k, self.config.std_dev_mul_thresh);
        debug!(
            mean = statistics.mean,
            std_dev = statistics.std_dev,
            threshold = statistics.threshold,
            k,
            "neighborhood score distribution"
        );

        let indices: Vec<usize> = scores
            .iter()
            .enumerate()
            .filter(|(_, &score)| (score <= statistics.threshold) != self.config.negative)
            .map(|(idx, _)| idx)
            .collect();

        let filtered: PointCloud<T> = indices.iter().map(|&idx| cloud[idx].clone()).collect();
        report.outliers_removed = if self.config.negative {
            indices.len()
        } else {
            cloud.len() - indices.len()
        };
        info!(
            input = cloud.len(),
            output = filtered.len(),
            "statistical outlier removal finished"
        );

        Ok(FilterResult {
            cloud: filtered,
            indices,
            statistics,
            report,
        })
    }
}

/// Mean distance from every indexed point to its `k` nearest neighbors,
/// not counting the point itself.
pub fn mean_neighbor_distances(tree: &KdTree, k: usize, pool: &WorkerPool) -> Vec<f64> {
    pool.map_indexed(tree.points(), |idx, point| {
        let (sum, count) = tree
            .find_k_nearest(point, k + 1)
            .into_iter()
            .filter(|&(neighbor, _)| neighbor != idx)
            .take(k)
            .fold((0.0f64, 0usize), |(sum, count), (_, distance)| {
                (sum + distance as f64, count + 1)
            });

        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    })
}

/// Reduce the scores to mean, standard deviation and threshold.
///
/// Runs sequentially after the parallel scoring so the result does not
/// depend on thread scheduling.
fn score_statistics(scores: &[f64], k: usize, std_dev_mul_thresh: f64) -> OutlierStatistics {
    let n = scores.len() as f64;
    let mean = scores.iter().sum::<f64>() / n;
    let std_dev = if scores.len() > 1 {
        let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / (n - 1.0);
        variance.sqrt()
    } else {
        0.0
    };

    OutlierStatistics {
        mean,
        std_dev,
        threshold: mean + std_dev_mul_thresh * std_dev,
        effective_k: k,
    }
}

/// Statistical outlier removal filter
///
/// # Arguments
/// * `cloud` - Input point cloud
/// * `mean_k` - Number of nearest neighbors to consider for each point
/// * `std_dev_mul_thresh` - Standard deviation multiplier for outlier detection
///
/// # Example
/// ```rust
/// use cloudmend_core::{PointCloud, Point3f};
/// use cloudmend_algorithms::statistical_outlier_removal;
///
/// fn main() -> cloudmend_core::Result<()> {
///     let cloud = PointCloud::from_points(vec![
///         Point3f::new(0.0, 0.0, 0.0),
///         Point3f::new(0.1, 0.0, 0.0),
///         Point3f::new(0.0, 0.1, 0.0),
///         Point3f::new(0.1, 0.1, 0.0),
///         Point3f::new(10.0, 10.0, 10.0), // outlier
///     ]);
///
///     let filtered = statistical_outlier_removal(&cloud, 3, 1.0)?;
///     assert_eq!(filtered.len(), 4);
///     Ok(())
/// }
/// ```
pub fn statistical_outlier_removal<T>(
    cloud: &PointCloud<T>,
    mean_k: usize,
    std_dev_mul_thresh: f64,
) -> Result<PointCloud<T>>
where
    T: HasPosition + Clone + Sync,
{
    let filter = StatisticalOutlierFilter::new(OutlierFilterConfig::new(mean_k, std_dev_mul_thresh))?;
    let pool = WorkerPool::new(&WorkerPoolConfig::default())?;
    Ok(filter.apply(cloud, &pool)?.cloud)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudmend_core::{CloudPoint, Point3f};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn run(cloud: &PointCloud<Point3f>, k: usize, mul: f64) -> FilterResult<Point3f> {
        let filter = StatisticalOutlierFilter::new(OutlierFilterConfig::new(k, mul)).unwrap();
        filter.apply(cloud, &WorkerPool::sequential()).unwrap()
    }

    fn lattice_with_outliers() -> PointCloud<Point3f> {
        let mut points = Vec::new();
        for i in 0..10 {
            for j in 0..10 {
                for k in 0..10 {
                    points.push(Point3f::new(i as f32 * 0.1, j as f32 * 0.1, k as f32 * 0.1));
                }
            }
        }
        points.push(Point3f::new(10.0, 10.0, 10.0));
        points.push(Point3f::new(-10.0, -10.0, -10.0));
        points.push(Point3f::new(5.0, 5.0, 5.0));
        PointCloud::from_points(points)
    }

    /// Evenly spread points on a sphere (Fibonacci lattice)
    fn sphere(radius: f32, n: usize) -> Vec<Point3f> {
        let golden_angle = std::f64::consts::PI * (3.0 - 5.0_f64.sqrt());
        (0..n)
            .map(|i| {
                let z = 1.0 - 2.0 * (i as f64 + 0.5) / n as f64;
                let r = (1.0 - z * z).sqrt();
                let theta = golden_angle * i as f64;
                Point3f::new(
                    (radius as f64 * r * theta.cos()) as f32,
                    (radius as f64 * r * theta.sin()) as f32,
                    (radius as f64 * z) as f32,
                )
            })
            .collect()
    }

    #[test]
    fn test_statistical_outlier_removal_empty_cloud() {
        let cloud = PointCloud::<Point3f>::new();
        let result = statistical_outlier_removal(&cloud, 5, 1.0);
        assert_eq!(result.unwrap().len(), 0);
    }

    #[test]
    fn test_statistical_outlier_removal_single_point() {
        let cloud = PointCloud::from_points(vec![Point3f::new(0.0, 0.0, 0.0)]);
        let result = run(&cloud, 1, 1.0);
        assert_eq!(result.cloud.len(), 1);
        assert_eq!(result.statistics.std_dev, 0.0);
        assert!(result.report.is_clean());
    }

    #[test]
    fn test_statistical_outlier_removal_with_outliers() {
        let cloud = lattice_with_outliers();
        let result = run(&cloud, 5, 1.0);

        assert!(result.cloud.len() < cloud.len());
        assert!(!result.indices.contains(&1000));
        assert!(!result.indices.contains(&1001));
        assert!(!result.indices.contains(&1002));
        assert_eq!(result.report.outliers_removed, cloud.len() - result.cloud.len());
    }

    #[test]
    fn test_sphere_with_far_outliers() {
        let mut points = sphere(1.0, 1000);
        points.extend(sphere(5.0, 20));
        let cloud = PointCloud::from_points(points);

        let result = run(&cloud, 10, 1.0);
        assert_eq!(result.indices, (0..1000).collect::<Vec<_>>());
        assert_eq!(result.report.outliers_removed, 20);
    }

    /// Points drawn uniformly on a sphere surface
    fn random_sphere(radius: f32, n: usize, seed: u64) -> Vec<Point3f> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                let z: f32 = rng.gen_range(-1.0..=1.0);
                let theta: f32 = rng.gen_range(0.0..std::f32::consts::TAU);
                let r = (1.0 - z * z).sqrt();
                Point3f::new(radius * r * theta.cos(), radius * r * theta.sin(), radius * z)
            })
            .collect()
    }

    #[test]
    fn test_random_sphere_with_far_outliers() {
        for seed in [1, 7, 42, 1234] {
            let mut points = random_sphere(1.0, 1000, seed);
            points.extend(sphere(5.0, 20));
            let cloud = PointCloud::from_points(points);

            let result = run(&cloud, 10, 1.0);
            assert_eq!(result.indices, (0..1000).collect::<Vec<_>>(), "seed {}", seed);
            assert_eq!(result.report.outliers_removed, 20);
        }
    }

    #[test]
    fn test_retained_points_keep_input_order() {
        let cloud = lattice_with_outliers();
        let result = run(&cloud, 5, 1.0);
        assert!(result.indices.windows(2).all(|w| w[0] < w[1]));
        for (point, &idx) in result.cloud.iter().zip(&result.indices) {
            assert_eq!(*point, cloud[idx]);
        }
    }

    #[test]
    fn test_larger_multiplier_never_retains_fewer() {
        let mut points = sphere(1.0, 400);
        points.extend(sphere(1.3, 15));
        points.extend(sphere(3.0, 5));
        let cloud = PointCloud::from_points(points);

        let mut previous = 0;
        for mul in [0.0, 0.25, 0.5, 1.0, 1.5, 2.0, 3.0, 10.0] {
            let retained = run(&cloud, 8, mul).cloud.len();
            assert!(retained >= previous, "multiplier {} retained {}", mul, retained);
            assert!(retained <= cloud.len());
            previous = retained;
        }
    }

    #[test]
    fn test_cloud_without_outliers_is_fixed_point() {
        // Cube corners: every point has exactly three neighbors at distance 1
        let mut points = Vec::new();
        for &x in &[0.0, 1.0] {
            for &y in &[0.0, 1.0] {
                for &z in &[0.0, 1.0] {
                    points.push(Point3f::new(x, y, z));
                }
            }
        }
        let cloud = PointCloud::from_points(points);

        let first = run(&cloud, 3, 1.0);
        assert_eq!(first.cloud, cloud);
        assert_eq!(first.statistics.mean, 1.0);
        assert_eq!(first.statistics.std_dev, 0.0);

        let second = run(&first.cloud, 3, 1.0);
        assert_eq!(second.cloud, first.cloud);
    }

    #[test]
    fn test_mean_k_clamped_to_cloud_size() {
        let cloud = PointCloud::from_points(vec![
            Point3f::new(0.0, 0.0, 0.0),
            Point3f::new(1.0, 0.0, 0.0),
            Point3f::new(0.0, 1.0, 0.0),
            Point3f::new(1.0, 1.0, 0.0),
        ]);
        let result = run(&cloud, 50, 1.0);

        assert_eq!(result.statistics.effective_k, 3);
        assert_eq!(result.report.clamped_parameters.len(), 1);
        assert_eq!(result.report.clamped_parameters[0].name, "mean_k");
        assert_eq!(result.report.clamped_parameters[0].used, 3.0);
        assert_eq!(result.cloud.len(), 4);
    }

    #[test]
    fn test_duplicate_points_are_not_their_own_neighbors() {
        let cloud = PointCloud::from_points(vec![
            Point3f::new(0.0, 0.0, 0.0),
            Point3f::new(0.0, 0.0, 0.0),
            Point3f::new(0.0, 0.0, 0.0),
            Point3f::new(3.0, 0.0, 0.0),
        ]);
        let tree = KdTree::from_cloud(&cloud).unwrap();
        let scores = mean_neighbor_distances(&tree, 2, &WorkerPool::sequential());
        assert_eq!(scores[..3], [0.0, 0.0, 0.0]);
        assert_eq!(scores[3], 3.0);
    }

    #[test]
    fn test_negative_mode_returns_complement() {
        let cloud = lattice_with_outliers();
        let kept = run(&cloud, 5, 1.0);

        let filter = StatisticalOutlierFilter::new(
            OutlierFilterConfig::new(5, 1.0).with_negative(true),
        )
        .unwrap();
        let rejected = filter.apply(&cloud, &WorkerPool::sequential()).unwrap();

        assert_eq!(kept.cloud.len() + rejected.cloud.len(), cloud.len());
        assert!(rejected.indices.contains(&1000));
        assert!(rejected.indices.iter().all(|idx| !kept.indices.contains(idx)));
    }

    #[test]
    fn test_parallel_and_sequential_agree() {
        let cloud = lattice_with_outliers();
        let filter = StatisticalOutlierFilter::new(OutlierFilterConfig::new(6, 0.5)).unwrap();
        let pool = WorkerPool::new(&WorkerPoolConfig::default().with_threads(4)).unwrap();

        let parallel = filter.apply(&cloud, &pool).unwrap();
        let sequential = filter.apply(&cloud, &WorkerPool::sequential()).unwrap();
        assert_eq!(parallel.indices, sequential.indices);
        assert_eq!(parallel.statistics, sequential.statistics);
    }

    #[test]
    fn test_attributes_carried_through() {
        let mut points: Vec<CloudPoint> = (0..5)
            .flat_map(|i| (0..5).map(move |j| (i, j)))
            .map(|(i, j)| {
                CloudPoint::with_color(
                    Point3f::new(i as f32 * 0.1, j as f32 * 0.1, 0.0),
                    [i as u8 * 50, j as u8 * 50, 7],
                )
            })
            .collect();
        points.push(CloudPoint::with_color(Point3f::new(9.0, 9.0, 9.0), [1, 2, 3]));
        let cloud = PointCloud::try_from_points(points).unwrap();

        let filter = StatisticalOutlierFilter::new(OutlierFilterConfig::new(4, 1.0)).unwrap();
        let result = filter.apply(&cloud, &WorkerPool::sequential()).unwrap();
        assert!(!result.indices.contains(&25));
        assert!(result.cloud.iter().all(|p| p.color.is_some()));
        assert_eq!(result.cloud.schema(), cloud.schema());
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(StatisticalOutlierFilter::new(OutlierFilterConfig::new(0, 1.0)).is_err());
        assert!(StatisticalOutlierFilter::new(OutlierFilterConfig::new(5, -1.0)).is_err());
        assert!(StatisticalOutlierFilter::new(OutlierFilterConfig::new(5, f64::NAN)).is_err());
        assert!(StatisticalOutlierFilter::new(OutlierFilterConfig::new(5, 0.0)).is_ok());
    }
}
