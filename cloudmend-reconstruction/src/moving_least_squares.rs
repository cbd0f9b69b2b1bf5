//! Moving Least Squares (MLS) surface smoothing and resampling
//!
//! For every query location the neighbors within the search radius are
//! weighted by distance, a tangent frame is estimated from their weighted
//! covariance, and a bivariate quadratic height field is fitted over the
//! tangent plane by weighted least squares. The query is replaced by its
//! projection onto that local surface, and the same surface is evaluated at
//! extra tangent-plane locations when upsampling is enabled.

use cloudmend_algorithms::{KdTree, WorkerPool, WorkerPoolConfig};
use cloudmend_core::{
    CloudPoint, Error, NearestNeighborSearch, Point3f, PointCloud, ProcessingReport, Result, Rgb,
    Vector3f,
};
use itertools::iproduct;
use nalgebra::{Matrix3, Matrix6, Point3, SymmetricEigen, Vector3, Vector6};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Neighborhoods smaller than this cannot define a tangent plane
pub const MIN_NEIGHBORS: usize = 3;

/// Number of terms in the quadratic height polynomial
const QUADRATIC_TERMS: usize = 6;

/// Smallest accepted ratio between the extreme eigenvalues of the normal
/// equations before the fit is considered singular
const MIN_EIGENVALUE_RATIO: f64 = 1e-10;

/// Weight function types for MLS reconstruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeightFunction {
    /// Gaussian weight: exp(-d²/h²)
    Gaussian,
    /// Wendland weight: (1-d/h)⁴ * (4d/h + 1) for d < h
    Wendland,
    /// Cubic weight: (1-d/h)³ for d < h
    Cubic,
    /// Inverse distance weight: 1/d
    InverseDistance,
}

impl WeightFunction {
    /// Weight of a neighbor at `distance` for support radius `h`
    pub fn weight(&self, distance: f64, h: f64) -> f64 {
        match self {
            WeightFunction::Gaussian => (-distance * distance / (h * h)).exp(),
            WeightFunction::Wendland => {
                if distance >= h {
                    0.0
                } else {
                    let r = distance / h;
                    (1.0 - r).powi(4) * (4.0 * r + 1.0)
                }
            }
            WeightFunction::Cubic => {
                if distance >= h {
                    0.0
                } else {
                    let r = distance / h;
                    (1.0 - r).powi(3)
                }
            }
            // Softened so coincident points get a finite weight
            WeightFunction::InverseDistance => 1.0 / (distance + 1e-3 * h),
        }
    }
}

/// Upsampling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpsamplingMethod {
    /// Only project the input points
    None,
    /// Sample a regular grid on the local surface around every point
    SampleLocalPlane,
    /// Add random surface samples where the neighborhood is sparser than a
    /// target density
    RandomUniformDensity,
}

/// Upsampling configuration
///
/// Both methods may be enabled together. Uniform density sampling then
/// measures density on the output of the local plane pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsamplingConfig {
    pub sample_local_plane: bool,
    pub random_uniform_density: bool,
    /// Radius of the disc sampled around each point by local plane sampling
    pub upsampling_radius: f64,
    /// Grid spacing of local plane sampling
    pub upsampling_step: f64,
    /// Desired number of points within the search radius. When unset, the
    /// median neighborhood size of the input is used.
    pub point_density: Option<usize>,
    /// Seed of the random samples drawn by uniform density sampling
    pub seed: u64,
}

impl Default for UpsamplingConfig {
    fn default() -> Self {
        Self {
            sample_local_plane: false,
            random_uniform_density: false,
            upsampling_radius: 0.10,
            upsampling_step: 0.03,
            point_density: None,
            seed: 0x5eed,
        }
    }
}

impl UpsamplingConfig {
    /// Enable exactly the given methods. `UpsamplingMethod::None` enables nothing.
    pub fn with_methods(mut self, methods: &[UpsamplingMethod]) -> Self {
        self.sample_local_plane = methods.contains(&UpsamplingMethod::SampleLocalPlane);
        self.random_uniform_density = methods.contains(&UpsamplingMethod::RandomUniformDensity);
        self
    }

    pub fn with_radius(mut self, radius: f64) -> Self {
        self.upsampling_radius = radius;
        self
    }

    pub fn with_step(mut self, step: f64) -> Self {
        self.upsampling_step = step;
        self
    }

    pub fn with_point_density(mut self, density: usize) -> Self {
        self.point_density = Some(density);
        self
    }

    /// Enabled methods, in the order they are applied
    pub fn methods(&self) -> Vec<UpsamplingMethod> {
        let mut methods = Vec::new();
        if self.sample_local_plane {
            methods.push(UpsamplingMethod::SampleLocalPlane);
        }
        if self.random_uniform_density {
            methods.push(UpsamplingMethod::RandomUniformDensity);
        }
        if methods.is_empty() {
            methods.push(UpsamplingMethod::None);
        }
        methods
    }

    pub fn is_enabled(&self) -> bool {
        self.sample_local_plane || self.random_uniform_density
    }

    pub fn validate(&self) -> Result<()> {
        if !self.upsampling_radius.is_finite() || self.upsampling_radius < 0.0 {
            return Err(Error::invalid_parameter(
                "upsampling_radius",
                format!("must be finite and non-negative, got {}", self.upsampling_radius),
            ));
        }
        if !self.upsampling_step.is_finite() || self.upsampling_step <= 0.0 {
            return Err(Error::invalid_parameter(
                "upsampling_step",
                format!("must be finite and positive, got {}", self.upsampling_step),
            ));
        }
        Ok(())
    }
}

/// Configuration for MLS surface reconstruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlsConfig {
    /// Neighborhood radius, also the support radius of the weight function
    pub search_radius: f64,
    /// Weight function to use
    pub weight_function: WeightFunction,
    /// Fit a quadratic height field. When false, points are projected onto
    /// the tangent plane only.
    pub polynomial_fit: bool,
    /// Whether to compute normals from the fitted surface
    pub compute_normals: bool,
    pub upsampling: UpsamplingConfig,
}

impl Default for MlsConfig {
    fn default() -> Self {
        Self {
            search_radius: 0.03,
            weight_function: WeightFunction::Gaussian,
            polynomial_fit: true,
            compute_normals: true,
            upsampling: UpsamplingConfig::default(),
        }
    }
}

impl MlsConfig {
    pub fn new(search_radius: f64) -> Self {
        Self {
            search_radius,
            ..Default::default()
        }
    }

    pub fn with_weight_function(mut self, weight_function: WeightFunction) -> Self {
        self.weight_function = weight_function;
        self
    }

    pub fn with_polynomial_fit(mut self, polynomial_fit: bool) -> Self {
        self.polynomial_fit = polynomial_fit;
        self
    }

    pub fn with_compute_normals(mut self, compute_normals: bool) -> Self {
        self.compute_normals = compute_normals;
        self
    }

    pub fn with_upsampling(mut self, upsampling: UpsamplingConfig) -> Self {
        self.upsampling = upsampling;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.search_radius.is_finite() || self.search_radius <= 0.0 {
            return Err(Error::invalid_parameter(
                "search_radius",
                format!("must be finite and positive, got {}", self.search_radius),
            ));
        }
        self.upsampling.validate()
    }
}

/// Orthonormal, right-handed frame at a surface location
#[derive(Debug, Clone, PartialEq)]
pub struct LocalFrame {
    /// Weighted centroid of the neighborhood
    pub origin: Point3<f64>,
    pub normal: Vector3<f64>,
    pub u_axis: Vector3<f64>,
    pub v_axis: Vector3<f64>,
}

impl LocalFrame {
    /// Estimate the frame of a weighted neighborhood by PCA: the normal is
    /// the eigenvector of the smallest eigenvalue of the weighted covariance.
    ///
    /// Returns `None` when the weights sum to zero.
    pub fn from_neighborhood(positions: &[Point3<f64>], weights: &[f64]) -> Option<Self> {
        let total: f64 = weights.iter().sum();
        if !(total > 0.0) {
            return None;
        }

        let centroid = positions
            .iter()
            .zip(weights)
            .fold(Vector3::zeros(), |acc, (p, &w)| acc + p.coords * w)
            / total;

        let mut covariance = Matrix3::zeros();
        for (p, &w) in positions.iter().zip(weights) {
            let d = p.coords - centroid;
            covariance += d * d.transpose() * w;
        }
        covariance /= total;

        let eigen = SymmetricEigen::new(covariance);
        let min_idx = eigen.eigenvalues.imin();
        let normal = eigen.eigenvectors.column(min_idx).into_owned();
        let normal = normal.try_normalize(1e-12).unwrap_or_else(Vector3::z);

        Some(Self::from_normal(Point3::from(centroid), normal))
    }

    /// Build a frame around a unit normal
    pub fn from_normal(origin: Point3<f64>, normal: Vector3<f64>) -> Self {
        let helper = if normal.x.abs() < 0.9 {
            Vector3::x()
        } else {
            Vector3::y()
        };
        let u_axis = (helper - normal * normal.dot(&helper)).normalize();
        let v_axis = normal.cross(&u_axis);
        Self {
            origin,
            normal,
            u_axis,
            v_axis,
        }
    }

    /// Flip the frame so the normal has a non-negative component along
    /// `direction`
    pub fn orient_towards(&mut self, direction: &Vector3<f64>) {
        if self.normal.dot(direction) < 0.0 {
            self.normal = -self.normal;
            self.v_axis = -self.v_axis;
        }
    }

    /// Tangent coordinates and signed height of a point
    pub fn project(&self, point: &Point3<f64>) -> (f64, f64, f64) {
        let d = point - self.origin;
        (d.dot(&self.u_axis), d.dot(&self.v_axis), d.dot(&self.normal))
    }

    /// World position of tangent coordinates and height
    pub fn to_world(&self, u: f64, v: f64, height: f64) -> Point3<f64> {
        self.origin + self.u_axis * u + self.v_axis * v + self.normal * height
    }
}

/// Quadratic height field `h(u,v) = a + b·u + c·v + d·u² + e·u·v + f·v²`
/// over a local tangent plane.
///
/// The fit runs on coordinates scaled by `scale` (the inverse support
/// radius) to keep the normal equations well conditioned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolynomialSurfacePatch {
    scaled: [f64; QUADRATIC_TERMS],
    scale: f64,
}

impl PolynomialSurfacePatch {
    /// The tangent plane itself
    pub fn planar() -> Self {
        Self {
            scaled: [0.0; QUADRATIC_TERMS],
            scale: 1.0,
        }
    }

    /// Weighted least squares fit of `(u, v, height)` samples.
    ///
    /// Returns `None` if there are fewer samples than terms or the normal
    /// equations are numerically singular.
    pub fn fit(samples: &[(f64, f64, f64)], weights: &[f64], scale: f64) -> Option<Self> {
        if samples.len() < QUADRATIC_TERMS {
            return None;
        }

        let mut ata = Matrix6::<f64>::zeros();
        let mut atb = Vector6::<f64>::zeros();
        for (&(u, v, h), &w) in samples.iter().zip(weights) {
            let basis = Self::basis(u * scale, v * scale);
            ata += basis * basis.transpose() * w;
            atb += basis * (h * w);
        }

        let eigenvalues = ata.symmetric_eigenvalues();
        let largest = eigenvalues.max();
        if !(largest > 0.0) || eigenvalues.min() / largest < MIN_EIGENVALUE_RATIO {
            return None;
        }

        let solution = ata.cholesky()?.solve(&atb);
        if solution.iter().any(|c| !c.is_finite()) {
            return None;
        }

        let mut scaled = [0.0; QUADRATIC_TERMS];
        scaled.copy_from_slice(solution.as_slice());
        Some(Self { scaled, scale })
    }

    fn basis(u: f64, v: f64) -> Vector6<f64> {
        Vector6::new(1.0, u, v, u * u, u * v, v * v)
    }

    /// Coefficients `[a, b, c, d, e, f]` in world units
    pub fn coefficients(&self) -> [f64; QUADRATIC_TERMS] {
        let s = self.scale;
        let c = &self.scaled;
        [c[0], c[1] * s, c[2] * s, c[3] * s * s, c[4] * s * s, c[5] * s * s]
    }

    /// Height above the tangent plane at `(u, v)`
    pub fn height(&self, u: f64, v: f64) -> f64 {
        Self::basis(u * self.scale, v * self.scale).dot(&Vector6::from(self.scaled))
    }

    /// Partial derivatives `(∂h/∂u, ∂h/∂v)` at `(u, v)`
    pub fn gradient(&self, u: f64, v: f64) -> (f64, f64) {
        let [_, b, c, d, e, f] = self.coefficients();
        (b + 2.0 * d * u + e * v, c + e * u + 2.0 * f * v)
    }
}

/// The local surface fitted around one query location
#[derive(Debug, Clone)]
pub struct MlsFit {
    pub frame: LocalFrame,
    pub patch: PolynomialSurfacePatch,
    /// Neighbors used for the fit, as `(index, distance)`
    pub neighbors: Vec<(usize, f32)>,
    /// Tangent coordinates of the query
    pub query_uv: (f64, f64),
    /// The quadratic fit was singular and the tangent plane was used instead
    pub planar_fallback: bool,
}

impl MlsFit {
    /// Surface position and unit normal at tangent coordinates `(u, v)`
    pub fn evaluate(&self, u: f64, v: f64) -> (Point3<f64>, Vector3<f64>) {
        let position = self.frame.to_world(u, v, self.patch.height(u, v));
        let (du, dv) = self.patch.gradient(u, v);
        let normal = (self.frame.normal - self.frame.u_axis * du - self.frame.v_axis * dv)
            .try_normalize(1e-12)
            .unwrap_or(self.frame.normal);
        (position, normal)
    }

    /// The query moved onto the fitted surface
    pub fn project_query(&self) -> (Point3<f64>, Vector3<f64>) {
        self.evaluate(self.query_uv.0, self.query_uv.1)
    }
}

/// Output of [`MovingLeastSquares::process`]
#[derive(Debug, Clone)]
pub struct ReconstructionResult {
    pub cloud: PointCloud<CloudPoint>,
    pub report: ProcessingReport,
}

/// Per query result of the first pass
enum QueryOutcome {
    Degenerate,
    Fitted {
        points: Vec<CloudPoint>,
        planar_fallback: bool,
    },
}

/// MLS smoothing and upsampling of attributed point clouds
#[derive(Debug, Clone)]
pub struct MovingLeastSquares {
    config: MlsConfig,
}

impl MovingLeastSquares {
    pub fn new(config: MlsConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &MlsConfig {
        &self.config
    }

    /// Fit the local surface around `query` using the points in `index`.
    ///
    /// `orientation` is a hint for the side the normal should face; without
    /// it the normal faces the viewpoint at the origin. Returns `None` when
    /// fewer than [`MIN_NEIGHBORS`] points lie within the search radius.
    pub fn fit_at(
        &self,
        query: &Point3f,
        orientation: Option<&Vector3f>,
        index: &KdTree,
    ) -> Option<MlsFit> {
        let h = self.config.search_radius;
        let neighbors = index.find_radius_neighbors(query, h as f32);
        if neighbors.len() < MIN_NEIGHBORS {
            return None;
        }

        let positions: Vec<Point3<f64>> = neighbors
            .iter()
            .map(|&(idx, _)| index.points()[idx].cast::<f64>())
            .collect();
        let weights: Vec<f64> = neighbors
            .iter()
            .map(|&(_, d)| self.config.weight_function.weight(d as f64, h))
            .collect();

        let query = query.cast::<f64>();
        let mut frame = LocalFrame::from_neighborhood(&positions, &weights)?;
        match orientation {
            Some(hint) => frame.orient_towards(&hint.cast::<f64>()),
            None => frame.orient_towards(&(Point3::origin() - query)),
        }

        let (qu, qv, _) = frame.project(&query);

        let (patch, planar_fallback) = if self.config.polynomial_fit {
            let samples: Vec<(f64, f64, f64)> =
                positions.iter().map(|p| frame.project(p)).collect();
            match PolynomialSurfacePatch::fit(&samples, &weights, 1.0 / h) {
                Some(patch) => (patch, false),
                None => (PolynomialSurfacePatch::planar(), true),
            }
        } else {
            (PolynomialSurfacePatch::planar(), false)
        };

        Some(MlsFit {
            frame,
            patch,
            neighbors,
            query_uv: (qu, qv),
            planar_fallback,
        })
    }

    /// Smooth every point of `cloud` onto its local surface and apply the
    /// configured upsampling.
    ///
    /// Points with fewer than [`MIN_NEIGHBORS`] neighbors are dropped and
    /// counted in the report. Output order follows the input: each point's
    /// projection is followed by its local plane samples, and uniform
    /// density samples come last.
    pub fn process(
        &self,
        cloud: &PointCloud<CloudPoint>,
        pool: &WorkerPool,
    ) -> Result<ReconstructionResult> {
        cloud.validate_schema()?;
        let mut report = ProcessingReport::new();
        if cloud.is_empty() {
            return Ok(ReconstructionResult {
                cloud: PointCloud::new(),
                report,
            });
        }

        let index = KdTree::from_cloud(cloud)?;
        let plane_offsets = self.local_plane_offsets(&mut report);

        let outcomes = pool.map_indexed(&cloud.points, |_, point| {
            match self.fit_at(&point.position, point.normal.as_ref(), &index) {
                None => QueryOutcome::Degenerate,
                Some(fit) => {
                    let mut points = Vec::with_capacity(1 + plane_offsets.len());
                    points.push(self.output_point(&fit, fit.query_uv, point.color));

                    let (qu, qv) = fit.query_uv;
                    for &(du, dv) in &plane_offsets {
                        let uv = (qu + du, qv + dv);
                        let color = self.blended_color(&fit, uv, cloud);
                        points.push(self.output_point(&fit, uv, color));
                    }

                    QueryOutcome::Fitted {
                        points,
                        planar_fallback: fit.planar_fallback,
                    }
                }
            }
        });

        let mut output = PointCloud::with_capacity(cloud.len() * (1 + plane_offsets.len()));
        let mut fitted = vec![false; cloud.len()];
        for (idx, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                QueryOutcome::Degenerate => report.degenerate_neighborhoods += 1,
                QueryOutcome::Fitted {
                    points,
                    planar_fallback,
                } => {
                    fitted[idx] = true;
                    if planar_fallback {
                        report.ill_conditioned_fits += 1;
                    }
                    report.points_synthesized += points.len() - 1;
                    output.extend(points);
                }
            }
        }

        if self.config.upsampling.random_uniform_density {
            let extra = self.uniform_density_pass(cloud, &index, &output, &fitted, pool)?;
            report.points_synthesized += extra.len();
            output.extend(extra);
        }

        info!(
            input = cloud.len(),
            output = output.len(),
            degenerate = report.degenerate_neighborhoods,
            planar_fallbacks = report.ill_conditioned_fits,
            "moving least squares finished"
        );

        Ok(ReconstructionResult {
            cloud: output,
            report,
        })
    }

    /// Grid offsets sampled around every query by local plane sampling,
    /// excluding the query itself
    fn local_plane_offsets(&self, report: &mut ProcessingReport) -> Vec<(f64, f64)> {
        let upsampling = &self.config.upsampling;
        let radius = upsampling.upsampling_radius;
        if !upsampling.sample_local_plane || radius <= 0.0 {
            return Vec::new();
        }

        let mut step = upsampling.upsampling_step;
        if step > radius {
            report.record_clamp("upsampling_step", step, radius);
            step = radius;
        }

        let steps = (radius / step + 1e-9).floor() as i64;
        let limit = radius * radius * (1.0 + 1e-9);
        let offsets: Vec<(f64, f64)> = iproduct!(-steps..=steps, -steps..=steps)
            .filter(|&(i, j)| (i, j) != (0, 0))
            .map(|(i, j)| (i as f64 * step, j as f64 * step))
            .filter(|&(du, dv)| du * du + dv * dv <= limit)
            .collect();
        debug!(samples = offsets.len(), step, radius, "local plane sampling grid");
        offsets
    }

    /// Draw random surface samples around every fitted input point whose
    /// neighborhood in `current` holds fewer points than the target density.
    ///
    /// A neighborhood of `n` points short by `deficit` gets `ceil(deficit / n)`
    /// samples from each of its members, so the disc fills up roughly to the
    /// target instead of `n` times past it.
    fn uniform_density_pass(
        &self,
        cloud: &PointCloud<CloudPoint>,
        index: &KdTree,
        current: &PointCloud<CloudPoint>,
        fitted: &[bool],
        pool: &WorkerPool,
    ) -> Result<Vec<CloudPoint>> {
        let h = self.config.search_radius;
        let target = match self.config.upsampling.point_density {
            Some(density) => density,
            None => median_neighborhood_size(index, h, pool),
        };
        let density_index = KdTree::from_cloud(current)?;
        let seed = self.config.upsampling.seed;
        debug!(target, "uniform density sampling");

        let samples = pool.map_indexed(&cloud.points, |idx, point| {
            if !fitted[idx] {
                return Vec::new();
            }
            let count = density_index
                .find_radius_neighbors(&point.position, h as f32)
                .len();
            if count >= target {
                return Vec::new();
            }
            let Some(fit) = self.fit_at(&point.position, point.normal.as_ref(), index) else {
                return Vec::new();
            };

            let quota = (target - count).div_ceil(count.max(1));
            let mut rng = StdRng::seed_from_u64(seed ^ idx as u64);
            let (qu, qv) = fit.query_uv;
            (0..quota)
                .map(|_| {
                    let r = h * rng.gen::<f64>().sqrt();
                    let theta = rng.gen::<f64>() * std::f64::consts::TAU;
                    let uv = (qu + r * theta.cos(), qv + r * theta.sin());
                    let color = self.blended_color(&fit, uv, cloud);
                    self.output_point(&fit, uv, color)
                })
                .collect::<Vec<_>>()
        });

        Ok(samples.into_iter().flatten().collect())
    }

    fn output_point(&self, fit: &MlsFit, uv: (f64, f64), color: Option<Rgb>) -> CloudPoint {
        let (position, normal) = fit.evaluate(uv.0, uv.1);
        CloudPoint {
            position: position.cast::<f32>(),
            color,
            normal: self.config.compute_normals.then(|| normal.cast::<f32>()),
        }
    }

    /// Neighbor colors blended by the weight of their distance to the
    /// surface point at `uv`
    fn blended_color(
        &self,
        fit: &MlsFit,
        uv: (f64, f64),
        cloud: &PointCloud<CloudPoint>,
    ) -> Option<Rgb> {
        let target = fit.frame.to_world(uv.0, uv.1, fit.patch.height(uv.0, uv.1));
        let h = self.config.search_radius;

        let mut sum = Vector3::<f64>::zeros();
        let mut total = 0.0;
        let mut fallback = None;
        for &(idx, _) in &fit.neighbors {
            let point = &cloud[idx];
            let color = point.color?;
            fallback.get_or_insert(color);
            let distance = (point.position.cast::<f64>() - target).norm();
            let w = self.config.weight_function.weight(distance, h);
            sum += Vector3::new(color[0] as f64, color[1] as f64, color[2] as f64) * w;
            total += w;
        }

        if total > 1e-12 {
            let c = sum / total;
            Some([
                c.x.round().clamp(0.0, 255.0) as u8,
                c.y.round().clamp(0.0, 255.0) as u8,
                c.z.round().clamp(0.0, 255.0) as u8,
            ])
        } else {
            fallback
        }
    }
}

/// Median number of points within `radius` of each indexed point
fn median_neighborhood_size(index: &KdTree, radius: f64, pool: &WorkerPool) -> usize {
    let mut counts = pool.map_indexed(index.points(), |_, p| {
        index.find_radius_neighbors(p, radius as f32).len()
    });
    if counts.is_empty() {
        return 0;
    }
    let mid = counts.len() / 2;
    *counts.select_nth_unstable(mid).1
}

/// Smooth a cloud with default settings and the given search radius
pub fn moving_least_squares(
    cloud: &PointCloud<CloudPoint>,
    search_radius: f64,
) -> Result<PointCloud<CloudPoint>> {
    let mls = MovingLeastSquares::new(MlsConfig::new(search_radius))?;
    let pool = WorkerPool::new(&WorkerPoolConfig::default())?;
    Ok(mls.process(cloud, &pool)?.cloud)
}

/// Estimate a search radius from point density: 3.5 times the median
/// nearest neighbor distance over a sample of the cloud.
pub fn estimate_search_radius(cloud: &PointCloud<CloudPoint>) -> Result<f64> {
    if cloud.len() < 2 {
        return Err(Error::InvalidInput(
            "at least two points are needed to estimate a search radius".to_string(),
        ));
    }

    let index = KdTree::from_cloud(cloud)?;
    let sample_size = (cloud.len() / 10).clamp(20, 200);
    let step = (cloud.len() / sample_size).max(1);

    let mut distances: Vec<f32> = (0..cloud.len())
        .step_by(step)
        .filter_map(|i| {
            index
                .find_k_nearest(&cloud[i].position, 2)
                .into_iter()
                .find(|&(idx, _)| idx != i)
                .map(|(_, d)| d)
        })
        .collect();

    distances.sort_by(f32::total_cmp);
    let median = distances[distances.len() / 2] as f64;
    if median <= 0.0 {
        return Err(Error::InvalidInput(
            "points are coincident, cannot estimate a search radius".to_string(),
        ));
    }
    Ok(median * 3.5)
}
