// stepflow/src/row/mod.rs

//! The row model: typed values, value descriptors, row shapes and rows.
//!
//! A [`Row`] never carries its [`RowShape`]; the shape travels alongside it so
//! that one shape can describe many rows.

pub mod descriptor;
pub mod shape;
pub mod value;

pub use descriptor::ValueDescriptor;
pub use shape::{RowShape, ShapeSnapshot};
pub use value::{Decimal, Value, ValueType};

use crate::error::{StepflowError, StepflowResult};
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

/// Positional values aligned 1:1 with a [`RowShape`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(Vec<Value>);

impl Row {
  pub fn new(values: Vec<Value>) -> Self {
    Row(values)
  }

  pub fn with_capacity(capacity: usize) -> Self {
    Row(Vec::with_capacity(capacity))
  }

  pub fn values(&self) -> &[Value] {
    &self.0
  }

  pub fn into_values(self) -> Vec<Value> {
    self.0
  }

  /// Looks a value up by name through `shape`.
  pub fn get_by_name<'a>(&'a self, shape: &RowShape, name: &str) -> StepflowResult<&'a Value> {
    let idx = shape.require_index(name)?;
    self.0.get(idx).ok_or(StepflowError::ShapeMismatch {
      expected: shape.len(),
      actual: self.0.len(),
    })
  }

  /// Checks that the row has exactly one value per descriptor.
  pub fn check_against(&self, shape: &RowShape) -> StepflowResult<()> {
    let expected = shape.len();
    if self.0.len() != expected {
      return Err(StepflowError::ShapeMismatch {
        expected,
        actual: self.0.len(),
      });
    }
    Ok(())
  }
}

impl Deref for Row {
  type Target = Vec<Value>;

  fn deref(&self) -> &Self::Target {
    &self.0
  }
}

impl DerefMut for Row {
  fn deref_mut(&mut self) -> &mut Self::Target {
    &mut self.0
  }
}

impl From<Vec<Value>> for Row {
  fn from(values: Vec<Value>) -> Self {
    Row(values)
  }
}

impl FromIterator<Value> for Row {
  fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
    Row(iter.into_iter().collect())
  }
}
