//! Filter-then-reconstruct pipeline
//!
//! Runs statistical outlier removal followed by MLS smoothing and upsampling
//! on one cloud, sharing a worker pool between both stages.

use crate::moving_least_squares::{MlsConfig, MovingLeastSquares};
use cloudmend_algorithms::{
    OutlierFilterConfig, OutlierStatistics, StatisticalOutlierFilter, WorkerPool, WorkerPoolConfig,
};
use cloudmend_core::{CloudPoint, PointCloud, ProcessingReport, Result};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, info_span};

/// Configuration for the reconstruction pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub filter: OutlierFilterConfig,
    pub mls: MlsConfig,
    pub workers: WorkerPoolConfig,
    /// Pass the input straight to reconstruction
    pub skip_filter: bool,
}

impl PipelineConfig {
    pub fn with_filter(mut self, filter: OutlierFilterConfig) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_mls(mut self, mls: MlsConfig) -> Self {
        self.mls = mls;
        self
    }

    pub fn with_workers(mut self, workers: WorkerPoolConfig) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_skip_filter(mut self, skip_filter: bool) -> Self {
        self.skip_filter = skip_filter;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.skip_filter {
            self.filter.validate()?;
        }
        self.mls.validate()
    }
}

/// Everything a pipeline run produces
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Output of the outlier filter (the input itself when filtering is skipped)
    pub filtered: PointCloud<CloudPoint>,
    /// Smoothed and upsampled cloud
    pub reconstructed: PointCloud<CloudPoint>,
    /// Score statistics of the filter, `None` when filtering is skipped
    pub outlier_statistics: Option<OutlierStatistics>,
    /// Merged report of both stages
    pub report: ProcessingReport,
    /// Wall clock time of the run in seconds
    pub processing_time: f32,
}

/// Outlier filter followed by MLS reconstruction
#[derive(Debug, Clone)]
pub struct ReconstructionPipeline {
    config: PipelineConfig,
    filter: StatisticalOutlierFilter,
    mls: MovingLeastSquares,
}

impl ReconstructionPipeline {
    /// Create a pipeline, rejecting invalid stage parameters up front
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let filter = StatisticalOutlierFilter::new(config.filter.clone())?;
        let mls = MovingLeastSquares::new(config.mls.clone())?;
        Ok(Self {
            config,
            filter,
            mls,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run both stages on `cloud`.
    ///
    /// The worker pool lives for the duration of this call. The merged report
    /// is logged once before returning.
    pub fn run(&self, cloud: &PointCloud<CloudPoint>) -> Result<PipelineOutput> {
        let _span = info_span!("pipeline", points = cloud.len()).entered();
        let start_time = Instant::now();

        cloud.validate_schema()?;
        let pool = WorkerPool::new(&self.config.workers)?;
        let mut report = ProcessingReport::new();

        let (filtered, outlier_statistics) = if self.config.skip_filter {
            info!("outlier filter skipped");
            (cloud.clone(), None)
        } else {
            let result = self.filter.apply(cloud, &pool)?;
            report.merge(result.report);
            (result.cloud, Some(result.statistics))
        };

        let reconstruction = self.mls.process(&filtered, &pool)?;
        report.merge(reconstruction.report);
        report.log_summary();

        Ok(PipelineOutput {
            filtered,
            reconstructed: reconstruction.cloud,
            outlier_statistics,
            report,
            processing_time: start_time.elapsed().as_secs_f32(),
        })
    }
}
