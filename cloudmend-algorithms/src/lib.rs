//! # cloudmend algorithms
//!
//! Spatial indexing and point cloud filtering.
//!
//! This crate provides the k-d tree used for neighbor queries by every stage,
//! the explicit worker pool that per-point work is spread over, and the
//! statistical outlier filter.

pub mod filtering;
pub mod nearest_neighbor;
pub mod parallel;

// Re-export commonly used items
pub use filtering::*;
pub use nearest_neighbor::*;
pub use parallel::*;
