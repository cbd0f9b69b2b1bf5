//! Core data structures and traits for cloudmend
//!
//! This crate provides the fundamental types shared by the filtering and
//! reconstruction stages: points with optional color and normal attributes,
//! point clouds, neighbor search traits, errors, and the processing report
//! that aggregates recoverable conditions.

pub mod point;
pub mod point_cloud;
pub mod traits;
pub mod report;
pub mod error;

pub use point::*;
pub use point_cloud::*;
pub use traits::*;
pub use report::*;
pub use error::*;

/// Re-export commonly used types from nalgebra
pub use nalgebra::{Point3, Vector3, Matrix3};
