//! Search space description.
//!
//! A space is an ordered list of named dimensions. Every dimension is
//! internally a finite index domain `[0, N)`; candidate points carry index
//! vectors, and indices resolve to concrete values only at the protocol
//! boundary.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A concrete parameter value, as seen by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Real(f64),
    Str(String),
}

/// A single tuning dimension.
///
/// `Int` and `Real` enumerate `min, min+step, …` up to and including `max`;
/// `Enum` enumerates its values in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Dimension {
    Int {
        name: String,
        min: i64,
        max: i64,
        step: i64,
    },
    Real {
        name: String,
        min: f64,
        max: f64,
        step: f64,
    },
    Enum {
        name: String,
        values: Vec<String>,
    },
}

impl Dimension {
    pub fn name(&self) -> &str {
        match self {
            Self::Int { name, .. } | Self::Real { name, .. } | Self::Enum { name, .. } => name,
        }
    }

    /// Size of the index domain.
    pub fn size(&self) -> usize {
        match self {
            Self::Int { min, max, step, .. } => ((max - min) / step) as usize + 1,
            Self::Real { min, max, step, .. } => ((max - min) / step).floor() as usize + 1,
            Self::Enum { values, .. } => values.len(),
        }
    }

    /// Resolve an index to its concrete value.
    pub fn value_at(&self, index: usize) -> Result<Value, CoreError> {
        if index >= self.size() {
            return Err(CoreError::IndexOutOfRange {
                name: self.name().to_string(),
                index,
                size: self.size(),
            });
        }
        Ok(match self {
            Self::Int { min, step, .. } => Value::Int(min + step * index as i64),
            Self::Real { min, step, .. } => Value::Real(min + step * index as f64),
            Self::Enum { values, .. } => Value::Str(values[index].clone()),
        })
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.name().is_empty() {
            return Err(CoreError::Space("dimension name must not be empty".into()));
        }
        match self {
            Self::Int { name, min, max, step } => {
                if *step <= 0 {
                    return Err(CoreError::Space(format!("{name}: step must be positive")));
                }
                if max < min {
                    return Err(CoreError::Space(format!("{name}: max must be >= min")));
                }
            }
            Self::Real { name, min, max, step } => {
                if !(*step > 0.0) {
                    return Err(CoreError::Space(format!("{name}: step must be positive")));
                }
                if max < min {
                    return Err(CoreError::Space(format!("{name}: max must be >= min")));
                }
            }
            Self::Enum { name, values } => {
                if values.is_empty() {
                    return Err(CoreError::Space(format!(
                        "{name}: enumeration needs at least one value"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// An ordered, named sequence of dimensions. Immutable once a session has
/// started; JOIN requests are matched against it structurally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Space {
    name: String,
    dims: Vec<Dimension>,
}

impl Space {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dims: Vec::new(),
        }
    }

    /// Append an integer dimension enumerating `min, min+step, … ≤ max`.
    pub fn int(
        &mut self,
        name: impl Into<String>,
        min: i64,
        max: i64,
        step: i64,
    ) -> Result<(), CoreError> {
        self.add(Dimension::Int {
            name: name.into(),
            min,
            max,
            step,
        })
    }

    /// Append a real dimension enumerated at a fixed step.
    pub fn real(
        &mut self,
        name: impl Into<String>,
        min: f64,
        max: f64,
        step: f64,
    ) -> Result<(), CoreError> {
        self.add(Dimension::Real {
            name: name.into(),
            min,
            max,
            step,
        })
    }

    /// Append a categorical dimension.
    pub fn enumerate<I>(&mut self, name: impl Into<String>, values: I) -> Result<(), CoreError>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.add(Dimension::Enum {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    /// Append an already-built dimension, validating it and the name's
    /// uniqueness.
    pub fn add(&mut self, dim: Dimension) -> Result<(), CoreError> {
        dim.validate()?;
        if self.dims.iter().any(|d| d.name() == dim.name()) {
            return Err(CoreError::Space(format!(
                "duplicate dimension name {}",
                dim.name()
            )));
        }
        self.dims.push(dim);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dimension count.
    pub fn len(&self) -> usize {
        self.dims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    pub fn dims(&self) -> &[Dimension] {
        &self.dims
    }

    pub fn dim(&self, i: usize) -> Option<&Dimension> {
        self.dims.get(i)
    }

    /// Index-domain sizes per dimension, in order.
    pub fn sizes(&self) -> Vec<usize> {
        self.dims.iter().map(Dimension::size).collect()
    }

    /// Resolve the index of dimension `i` to its concrete value.
    pub fn value_at(&self, i: usize, index: usize) -> Result<Value, CoreError> {
        let dim = self
            .dims
            .get(i)
            .ok_or_else(|| CoreError::Space(format!("no dimension at position {i}")))?;
        dim.value_at(index)
    }
}
