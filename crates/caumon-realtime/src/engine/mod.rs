// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Analysis engine adapter
//!
//! The realtime core never builds engine scripts. It hands an engine a typed
//! trace matrix, the signal names and the formula, and gets upper/lower
//! robustness vectors back.
//!
//! ## Adapter invariants
//! - Calls on one adapter are never concurrent; the session serializes them.
//! - `shutdown` is called at most once per session, after any in-flight
//!   dispatch has returned. Calls made after `shutdown` should fail with
//!   [`EngineError::ShutDown`].

pub mod stdio;

use std::path::Path;
use std::time::Duration;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::trace::TraceMatrix;

pub use stdio::{StdioEngine, StdioEngineOptions};

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine failed to start: {0}")]
    Startup(String),

    #[error("engine I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("engine did not respond within {0:?}")]
    Timeout(Duration),

    #[error("engine reported an error: {0}")]
    Remote(String),

    #[error("engine protocol error: {0}")]
    Protocol(String),

    #[error("engine process exited")]
    Exited,

    #[error("engine has been shut down")]
    ShutDown,
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Result value as reported by an engine: a single number or a series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EngineValue {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl EngineValue {
    pub fn into_vec(self) -> Vec<f64> {
        match self {
            Self::Scalar(value) => vec![value],
            Self::Vector(values) => values,
        }
    }
}

/// Upper/lower robustness returned by an evaluation
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Robustness {
    pub upper: Vec<f64>,
    pub lower: Vec<f64>,
}

impl Robustness {
    pub fn new(upper: Vec<f64>, lower: Vec<f64>) -> Self {
        Self { upper, lower }
    }

    /// Normalize scalar or vector engine values
    pub fn from_values(upper: EngineValue, lower: EngineValue) -> Self {
        Self::new(upper.into_vec(), lower.into_vec())
    }

    /// Most recent (upper, lower) pair
    pub fn latest(&self) -> Option<(f64, f64)> {
        Some((*self.upper.last()?, *self.lower.last()?))
    }

    pub fn is_empty(&self) -> bool {
        self.upper.is_empty() && self.lower.is_empty()
    }
}

/// Typed call contract of an analysis engine
pub trait EngineAdapter: Send {
    /// Short name for log messages
    fn name(&self) -> &str {
        "engine"
    }

    /// Point the engine at the directory holding its own resources
    fn configure_working_directory(&mut self, path: &Path) -> EngineResult<()>;

    fn evaluate(
        &mut self,
        trace: &TraceMatrix,
        signal_names: &[String],
        formula: &str,
    ) -> EngineResult<Robustness>;

    /// Render `results`; `output_path` is only given when the plot should be saved
    fn visualize(
        &mut self,
        trace: &TraceMatrix,
        signal_names: &[String],
        formula: &str,
        results: &Robustness,
        output_path: Option<&Path>,
    ) -> EngineResult<()>;

    fn shutdown(&mut self) -> EngineResult<()>;
}

/// Creates one engine per session
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> EngineResult<Box<dyn EngineAdapter>>;
}

impl<F> EngineFactory for F
where
    F: Fn() -> EngineResult<Box<dyn EngineAdapter>> + Send + Sync,
{
    fn create(&self) -> EngineResult<Box<dyn EngineAdapter>> {
        self()
    }
}

/// Small all-zero trace used to warm an engine up before real data arrives
///
/// Three time steps (t = 0, 1, 2) and one zero row per signal.
pub fn warmup_trace(signal_count: usize) -> TraceMatrix {
    let data = Array2::from_shape_fn((signal_count + 1, 3), |(row, col)| {
        if row == 0 {
            col as f64
        } else {
            0.0
        }
    });
    TraceMatrix::from_array(data)
}
