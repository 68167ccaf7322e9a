// stepflow/src/row/descriptor.rs

//! Describes one positional value of a row: name, type and presentation.

use super::value::ValueType;
use serde::{Deserialize, Serialize};

/// Metadata of a single value in a [`RowShape`](super::RowShape).
///
/// Immutable once built: the `with_*` methods return a modified copy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueDescriptor {
  name: String,
  value_type: ValueType,
  length: Option<u32>,
  precision: Option<u32>,
  format: Option<String>,
  /// Textual representation that is read back as null.
  null_if: Option<String>,
}

impl ValueDescriptor {
  pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
    Self {
      name: name.into(),
      value_type,
      length: None,
      precision: None,
      format: None,
      null_if: None,
    }
  }

  pub fn string(name: impl Into<String>) -> Self {
    Self::new(name, ValueType::String)
  }

  pub fn integer(name: impl Into<String>) -> Self {
    Self::new(name, ValueType::Integer)
  }

  pub fn number(name: impl Into<String>) -> Self {
    Self::new(name, ValueType::Number)
  }

  pub fn with_length(mut self, length: u32) -> Self {
    self.length = Some(length);
    self
  }

  pub fn with_precision(mut self, precision: u32) -> Self {
    self.precision = Some(precision);
    self
  }

  pub fn with_format(mut self, format: impl Into<String>) -> Self {
    self.format = Some(format.into());
    self
  }

  pub fn with_null_if(mut self, null_if: impl Into<String>) -> Self {
    self.null_if = Some(null_if.into());
    self
  }

  pub(crate) fn renamed(&self, name: impl Into<String>) -> Self {
    let mut copy = self.clone();
    copy.name = name.into();
    copy
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn value_type(&self) -> ValueType {
    self.value_type
  }

  pub fn length(&self) -> Option<u32> {
    self.length
  }

  pub fn precision(&self) -> Option<u32> {
    self.precision
  }

  pub fn format(&self) -> Option<&str> {
    self.format.as_deref()
  }

  pub fn null_if(&self) -> Option<&str> {
    self.null_if.as_deref()
  }
}
