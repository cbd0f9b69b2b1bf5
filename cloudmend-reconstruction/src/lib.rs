//! # cloudmend reconstruction
//!
//! Moving least squares surface smoothing and upsampling, and the pipeline
//! that runs it after statistical outlier removal.

pub mod moving_least_squares;
pub mod pipeline;

// Re-export commonly used items
pub use moving_least_squares::*;
pub use pipeline::*;
