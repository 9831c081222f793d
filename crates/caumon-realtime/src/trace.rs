// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Session trace storage
//!
//! A [`TraceBuffer`] is the ordered, append-only record of every accepted
//! [`DataPoint`] in one monitoring session. The first point fixes the arity
//! (timestamp plus signal values) for the rest of the session. Engines get a
//! [`TraceMatrix`]: a signal-major copy where row 0 holds the timestamps and
//! each column is one time step.

use ndarray::{Array2, ArrayView1};
use parking_lot::Mutex;
use thiserror::Error;

/// Trace errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TraceError {
    #[error("data point has no values")]
    EmptyPoint,

    #[error("arity mismatch: session expects {expected} values per point, got {found}")]
    ArityMismatch { expected: usize, found: usize },
}

/// One decoded telemetry sample: `[time, v1, ..., vN]`
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    values: Vec<f64>,
}

impl DataPoint {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    /// Timestamp (first value)
    pub fn time(&self) -> Option<f64> {
        self.values.first().copied()
    }

    /// Signal values following the timestamp
    pub fn signals(&self) -> &[f64] {
        self.values.get(1..).unwrap_or(&[])
    }

    /// Number of values including the timestamp
    pub fn arity(&self) -> usize {
        self.values.len()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }
}

impl From<Vec<f64>> for DataPoint {
    fn from(values: Vec<f64>) -> Self {
        Self::new(values)
    }
}

#[derive(Debug, Default)]
struct TraceInner {
    points: Vec<DataPoint>,
    arity: Option<usize>,
}

/// Append-only, thread-safe trace of one session
///
/// Readers only ever get snapshots; no lock is held once a method returns.
#[derive(Debug, Default)]
pub struct TraceBuffer {
    inner: Mutex<TraceInner>,
}

impl TraceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a point, returning the new trace length
    ///
    /// # Errors
    ///
    /// Rejects empty points and points whose arity differs from the first
    /// accepted point. A rejected point leaves the trace untouched.
    pub fn append(&self, point: DataPoint) -> Result<usize, TraceError> {
        if point.arity() == 0 {
            return Err(TraceError::EmptyPoint);
        }

        let mut inner = self.inner.lock();
        match inner.arity {
            Some(expected) if expected != point.arity() => {
                return Err(TraceError::ArityMismatch {
                    expected,
                    found: point.arity(),
                });
            }
            Some(_) => {}
            None => inner.arity = Some(point.arity()),
        }

        inner.points.push(point);
        Ok(inner.points.len())
    }

    /// Copy of all points in arrival order
    pub fn snapshot(&self) -> Vec<DataPoint> {
        self.inner.lock().points.clone()
    }

    pub fn size(&self) -> usize {
        self.inner.lock().points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Arity fixed by the first accepted point
    pub fn signal_arity(&self) -> Option<usize> {
        self.inner.lock().arity
    }
}

/// Signal-major trace matrix handed to analysis engines
///
/// Shape is `(arity, steps)`: row 0 is time, row `i` is signal `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceMatrix {
    data: Array2<f64>,
}

impl TraceMatrix {
    /// Transpose a sequence of points into a matrix
    ///
    /// # Errors
    ///
    /// Fails on ragged input (points of differing arity).
    pub fn from_points(points: &[DataPoint]) -> Result<Self, TraceError> {
        let arity = points.first().map(DataPoint::arity).unwrap_or(0);
        if let Some(bad) = points.iter().find(|p| p.arity() != arity) {
            return Err(TraceError::ArityMismatch {
                expected: arity,
                found: bad.arity(),
            });
        }

        let data = Array2::from_shape_fn((arity, points.len()), |(row, col)| {
            points[col].as_slice()[row]
        });
        Ok(Self { data })
    }

    pub fn from_array(data: Array2<f64>) -> Self {
        Self { data }
    }

    /// Number of time steps (columns)
    pub fn steps(&self) -> usize {
        self.data.ncols()
    }

    /// Number of signal rows, excluding the time row
    pub fn signal_count(&self) -> usize {
        self.data.nrows().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn times(&self) -> Option<ArrayView1<'_, f64>> {
        (self.data.nrows() > 0).then(|| self.data.row(0))
    }

    /// Row for signal `index` (0-based, time row excluded)
    pub fn signal(&self, index: usize) -> Option<ArrayView1<'_, f64>> {
        let row = index + 1;
        (row < self.data.nrows()).then(|| self.data.row(row))
    }

    pub fn as_array(&self) -> &Array2<f64> {
        &self.data
    }

    /// Nested rows, time row first
    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        self.data.rows().into_iter().map(|row| row.to_vec()).collect()
    }
}
