//! Parallel processing utilities
//!
//! Per-point work in the filter and reconstruction stages is independent, so
//! it is mapped over a rayon thread pool. The pool is an explicit object owned
//! by whoever runs a stage (usually the pipeline, for the duration of a single
//! run) rather than a process-wide global.

use cloudmend_core::{Error, Result};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Thread pool configuration for parallel processing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Number of threads to use (None = one per logical CPU)
    pub num_threads: Option<usize>,
    /// Thread stack size in bytes
    pub stack_size: Option<usize>,
    /// Thread name prefix
    pub thread_name_prefix: String,
    /// Enable parallel processing (can be disabled for debugging)
    pub enabled: bool,
    /// Inputs shorter than this are processed on the calling thread
    pub min_parallel_len: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_threads: None,
            stack_size: None,
            thread_name_prefix: "cloudmend-worker".to_string(),
            enabled: true,
            min_parallel_len: 64,
        }
    }
}

impl WorkerPoolConfig {
    /// Set number of threads
    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = Some(num_threads);
        self
    }

    /// Set stack size
    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }

    /// Enable or disable parallel processing
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Configuration that runs everything on the calling thread
    pub fn sequential() -> Self {
        Self::default().with_enabled(false)
    }
}

/// A scoped pool of worker threads
///
/// Dropping the pool joins its threads.
pub struct WorkerPool {
    pool: Option<ThreadPool>,
    min_parallel_len: usize,
}

impl WorkerPool {
    /// Create a pool from a configuration
    pub fn new(config: &WorkerPoolConfig) -> Result<Self> {
        if !config.enabled {
            return Ok(Self::sequential());
        }

        if config.num_threads == Some(0) {
            return Err(Error::invalid_parameter(
                "num_threads",
                "must be at least 1",
            ));
        }

        let mut builder = ThreadPoolBuilder::new();

        if let Some(num_threads) = config.num_threads {
            builder = builder.num_threads(num_threads);
        }

        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        if !config.thread_name_prefix.is_empty() {
            let prefix = config.thread_name_prefix.clone();
            builder = builder.thread_name(move |index| format!("{}-{}", prefix, index));
        }

        let pool = builder
            .build()
            .map_err(|e| Error::Algorithm(format!("Failed to create thread pool: {}", e)))?;
        debug!(threads = pool.current_num_threads(), "worker pool started");

        Ok(Self {
            pool: Some(pool),
            min_parallel_len: config.min_parallel_len,
        })
    }

    /// A pool without threads; all work runs on the caller
    pub fn sequential() -> Self {
        Self {
            pool: None,
            min_parallel_len: usize::MAX,
        }
    }

    /// Number of threads work is spread over
    pub fn num_threads(&self) -> usize {
        self.pool.as_ref().map_or(1, ThreadPool::current_num_threads)
    }

    /// Map every element with its index, collecting results in input order.
    ///
    /// Each result lands in its own slot, so no synchronization is needed and
    /// the output is identical to a sequential map.
    pub fn map_indexed<T, U, F>(&self, data: &[T], f: F) -> Vec<U>
    where
        T: Sync,
        U: Send,
        F: Fn(usize, &T) -> U + Sync + Send,
    {
        match &self.pool {
            Some(pool) if data.len() >= self.min_parallel_len => pool.install(|| {
                data.par_iter()
                    .enumerate()
                    .map(|(i, x)| f(i, x))
                    .collect()
            }),
            _ => data.iter().enumerate().map(|(i, x)| f(i, x)).collect(),
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.num_threads())
            .field("min_parallel_len", &self.min_parallel_len)
            .finish()
    }
}
