//! Aggregated, non-fatal processing conditions
//!
//! Stages recover locally from degenerate neighborhoods, ill-conditioned
//! fits and out-of-range parameters. Instead of logging each occurrence they
//! count them here, and the caller reports the totals once per run.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

/// A parameter that was replaced by a usable value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterClamp {
    /// Parameter name as exposed in the configuration
    pub name: String,
    /// Value the caller asked for
    pub requested: f64,
    /// Value the stage actually used
    pub used: f64,
}

/// Counters for conditions a stage recovered from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingReport {
    /// Query points dropped because too few neighbors were found
    pub degenerate_neighborhoods: usize,
    /// Surface fits that fell back to a planar patch
    pub ill_conditioned_fits: usize,
    /// Points discarded by the outlier filter
    pub outliers_removed: usize,
    /// Points synthesized by upsampling
    pub points_synthesized: usize,
    /// Parameters clamped into their valid range
    pub clamped_parameters: Vec<ParameterClamp>,
}

impl ProcessingReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a clamped parameter and warn about it
    pub fn record_clamp(&mut self, name: &str, requested: f64, used: f64) {
        warn!(
            parameter = name,
            requested, used, "parameter out of range, clamped"
        );
        self.clamped_parameters.push(ParameterClamp {
            name: name.to_string(),
            requested,
            used,
        });
    }

    /// Fold another report into this one
    pub fn merge(&mut self, other: ProcessingReport) {
        self.degenerate_neighborhoods += other.degenerate_neighborhoods;
        self.ill_conditioned_fits += other.ill_conditioned_fits;
        self.outliers_removed += other.outliers_removed;
        self.points_synthesized += other.points_synthesized;
        self.clamped_parameters.extend(other.clamped_parameters);
    }

    /// True when nothing had to be recovered from
    pub fn is_clean(&self) -> bool {
        self.degenerate_neighborhoods == 0
            && self.ill_conditioned_fits == 0
            && self.clamped_parameters.is_empty()
    }

    /// Emit the run summary as a single log event
    pub fn log_summary(&self) {
        if self.is_clean() {
            info!(
                outliers_removed = self.outliers_removed,
                points_synthesized = self.points_synthesized,
                "processing finished"
            );
        } else {
            warn!(
                outliers_removed = self.outliers_removed,
                points_synthesized = self.points_synthesized,
                degenerate_neighborhoods = self.degenerate_neighborhoods,
                ill_conditioned_fits = self.ill_conditioned_fits,
                clamped_parameters = self.clamped_parameters.len(),
                "processing finished with recovered conditions"
            );
        }
    }
}

impl fmt::Display for ProcessingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "outliers removed:         {}", self.outliers_removed)?;
        writeln!(f, "points synthesized:       {}", self.points_synthesized)?;
        writeln!(f, "degenerate neighborhoods: {}", self.degenerate_neighborhoods)?;
        write!(f, "planar fallbacks:         {}", self.ill_conditioned_fits)?;
        for clamp in &self.clamped_parameters {
            write!(
                f,
                "\nclamped {}: {} -> {}",
                clamp.name, clamp.requested, clamp.used
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_adds_counters() {
        let mut a = ProcessingReport {
            degenerate_neighborhoods: 2,
            outliers_removed: 5,
            ..Default::default()
        };
        let mut b = ProcessingReport {
            degenerate_neighborhoods: 1,
            ill_conditioned_fits: 4,
            ..Default::default()
        };
        b.record_clamp("mean_k", 50.0, 9.0);

        a.merge(b);
        assert_eq!(a.degenerate_neighborhoods, 3);
        assert_eq!(a.ill_conditioned_fits, 4);
        assert_eq!(a.outliers_removed, 5);
        assert_eq!(a.clamped_parameters.len(), 1);
        assert_eq!(a.clamped_parameters[0].used, 9.0);
        assert!(!a.is_clean());
    }

    #[test]
    fn test_default_report_is_clean() {
        let report = ProcessingReport::new();
        assert!(report.is_clean());
        assert!(report.to_string().contains("outliers removed"));
    }
}
