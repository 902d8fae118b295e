//! Candidate points, performance vectors, and trials.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A candidate configuration: one index per space dimension plus a session
/// unique id and an opaque strategy step tag.
///
/// `id == -1` marks "no point"; free pool slots and an unset incumbent
/// best are represented this way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub id: i32,
    pub step: i32,
    pub coords: Vec<usize>,
}

impl Point {
    pub const NO_ID: i32 = -1;

    /// The "no point" marker.
    pub fn invalid() -> Self {
        Self {
            id: Self::NO_ID,
            step: 0,
            coords: Vec::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.id >= 0
    }
}

/// Fixed-width performance vector. NaN marks an unmeasured entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Perf {
    values: Vec<f64>,
}

impl Perf {
    pub fn new(width: usize) -> Self {
        Self {
            values: vec![f64::NAN; width],
        }
    }

    pub fn width(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Mark every entry unmeasured.
    pub fn reset(&mut self) {
        self.values.fill(f64::NAN);
    }

    /// Copy a reported vector in; the width must match.
    pub fn copy_from(&mut self, reported: &[f64]) -> Result<(), CoreError> {
        if reported.len() != self.values.len() {
            return Err(CoreError::PerfWidth {
                got: reported.len(),
                want: self.values.len(),
            });
        }
        self.values.copy_from_slice(reported);
        Ok(())
    }

    /// Collapse the vector to a single comparable figure (the sum).
    /// NaN entries poison the result, so unmeasured trials never compare
    /// better than measured ones.
    pub fn unified(&self) -> f64 {
        self.values.iter().sum()
    }

    pub fn is_measured(&self) -> bool {
        self.values.iter().all(|v| !v.is_nan())
    }
}

/// A point paired with its measured performance. One trial occupies one
/// pool slot from generation until the strategy consumes its analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trial {
    pub point: Point,
    pub perf: Perf,
}

impl Trial {
    pub fn empty(perf_width: usize) -> Self {
        Self {
            point: Point::invalid(),
            perf: Perf::new(perf_width),
        }
    }
}
