// stepflow/src/partition.rs

//! Partition assignments and the router that maps a row to a target copy.
//!
//! Routing is a pure function of the row's key value and the number of
//! targets, so identical keys always reach the same copy within a run. The
//! hash is `DefaultHasher::new()`, which is keyed with fixed constants and
//! therefore identical in every thread and every process built from the
//! same binary.

use crate::error::{StepflowError, StepflowResult};
use crate::row::{Row, RowShape, Value};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionMethod {
  /// No partitioning: a single downstream copy, or round-robin over copies.
  #[default]
  None,
  /// Every copy receives every row.
  Mirror,
  /// Hash of the key field modulo the number of copies.
  Keyed,
  /// Integer key field modulo the number of copies.
  Modulo,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionAssignment {
  pub method: PartitionMethod,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub key_field: Option<String>,
  /// Ordered partition / target identities. Informational for local
  /// execution, where the number of targets is the copy count.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub schema: Vec<String>,
}

impl PartitionAssignment {
  pub fn none() -> Self {
    Self::default()
  }

  pub fn mirror() -> Self {
    Self {
      method: PartitionMethod::Mirror,
      ..Self::default()
    }
  }

  pub fn keyed(key_field: impl Into<String>) -> Self {
    Self {
      method: PartitionMethod::Keyed,
      key_field: Some(key_field.into()),
      schema: Vec::new(),
    }
  }

  pub fn modulo(key_field: impl Into<String>) -> Self {
    Self {
      method: PartitionMethod::Modulo,
      key_field: Some(key_field.into()),
      schema: Vec::new(),
    }
  }

  pub fn with_schema<I, S>(mut self, ids: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.schema = ids.into_iter().map(Into::into).collect();
    self
  }

  pub fn is_partitioned(&self) -> bool {
    self.method != PartitionMethod::None
  }

  /// Checks that keyed methods name a key field.
  pub fn validate(&self, step_name: &str) -> StepflowResult<()> {
    match self.method {
      PartitionMethod::Keyed | PartitionMethod::Modulo if self.key_field.as_deref().map_or(true, str::is_empty) => {
        Err(StepflowError::ConfigurationError {
          step_name: step_name.to_string(),
          message: format!("partitioning method {:?} requires a key field", self.method),
        })
      }
      _ => Ok(()),
    }
  }
}

/// Maps rows to target copy indices.
pub struct PartitionRouter;

impl PartitionRouter {
  /// Returns the target index in `[0, targets)` for `row`.
  ///
  /// `Mirror` is a broadcast, not a single target, and is rejected here: the
  /// step runner enqueues mirrored rows on every target itself.
  pub fn route(row: &Row, shape: &RowShape, assignment: &PartitionAssignment, targets: usize) -> StepflowResult<usize> {
    if targets == 0 {
      return Err(StepflowError::Routing("cannot route a row to zero targets".to_string()));
    }
    match assignment.method {
      PartitionMethod::None => Ok(0),
      PartitionMethod::Mirror => Err(StepflowError::Routing(
        "mirror partitioning broadcasts to every target and has no single route".to_string(),
      )),
      PartitionMethod::Keyed => {
        let key = Self::key_value(row, shape, assignment)?;
        Ok(Self::hash_route(key, targets))
      }
      PartitionMethod::Modulo => {
        let key = Self::key_value(row, shape, assignment)?;
        match key {
          Value::Integer(i) => Ok(i.rem_euclid(targets as i64) as usize),
          // Nulls and non-integers fall back to hashing so they still route deterministically.
          other => Ok(Self::hash_route(other, targets)),
        }
      }
    }
  }

  /// Routes by an explicit key field, used to spread rows across hops.
  pub fn route_by_field(row: &Row, shape: &RowShape, field: &str, targets: usize) -> StepflowResult<usize> {
    if targets == 0 {
      return Err(StepflowError::Routing("cannot route a row to zero targets".to_string()));
    }
    let key = row.get_by_name(shape, field)?;
    Ok(Self::hash_route(key, targets))
  }

  fn key_value<'a>(row: &'a Row, shape: &RowShape, assignment: &PartitionAssignment) -> StepflowResult<&'a Value> {
    let field = assignment
      .key_field
      .as_deref()
      .ok_or_else(|| StepflowError::Routing("keyed partitioning without a key field".to_string()))?;
    row.get_by_name(shape, field)
  }

  fn hash_route(key: &Value, targets: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % targets as u64) as usize
  }
}
