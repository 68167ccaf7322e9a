// stepflow/src/step/error_handling.rs

//! Error-hop configuration of a step: where failed rows go, the fields
//! appended to them, and the rejection thresholds that turn row errors into
//! a fatal pipeline error.

use crate::core::step::RowError;
use crate::row::{Row, RowShape, Value, ValueDescriptor};
use serde::{Deserialize, Serialize};

fn default_count_field() -> String {
  "error_count".to_string()
}

fn default_descriptions_field() -> String {
  "error_descriptions".to_string()
}

fn default_fields_field() -> String {
  "error_fields".to_string()
}

fn default_codes_field() -> String {
  "error_codes".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorHandling {
  /// Step receiving failed rows. Must be a successor of the owning step.
  pub target_step: String,
  /// Fatal once more than this many rows have been rejected.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_errors: Option<u64>,
  /// Fatal once the rejected percentage of rows read exceeds this.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_percent_errors: Option<u32>,
  /// Percentage check only applies after this many rows were read.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub min_rows_for_percent: Option<u64>,
  #[serde(default = "default_count_field")]
  pub count_field: String,
  #[serde(default = "default_descriptions_field")]
  pub descriptions_field: String,
  #[serde(default = "default_fields_field")]
  pub fields_field: String,
  #[serde(default = "default_codes_field")]
  pub codes_field: String,
}

impl ErrorHandling {
  pub fn new(target_step: impl Into<String>) -> Self {
    Self {
      target_step: target_step.into(),
      max_errors: None,
      max_percent_errors: None,
      min_rows_for_percent: None,
      count_field: default_count_field(),
      descriptions_field: default_descriptions_field(),
      fields_field: default_fields_field(),
      codes_field: default_codes_field(),
    }
  }

  pub fn with_max_errors(mut self, max: u64) -> Self {
    self.max_errors = Some(max);
    self
  }

  pub fn with_max_percent_errors(mut self, pct: u32, min_rows: u64) -> Self {
    self.max_percent_errors = Some(pct);
    self.min_rows_for_percent = Some(min_rows);
    self
  }

  /// The input shape extended with the four error fields. Names colliding
  /// with existing fields get the usual `_N` suffix.
  pub fn error_shape(&self, input: &RowShape) -> RowShape {
    let shape = input.clone();
    shape.add_value(ValueDescriptor::integer(&self.count_field));
    shape.add_value(ValueDescriptor::string(&self.descriptions_field));
    shape.add_value(ValueDescriptor::string(&self.fields_field));
    shape.add_value(ValueDescriptor::string(&self.codes_field));
    shape
  }

  /// Appends the error details of `err` to a copy of `row`.
  pub fn error_row(&self, row: &Row, err: &anyhow::Error) -> Row {
    let (description, fields, code) = match err.downcast_ref::<RowError>() {
      Some(row_err) => (
        row_err.description.clone(),
        row_err.fields.join(","),
        row_err.code.clone().map(Value::String).unwrap_or(Value::Null),
      ),
      None => (format!("{err:#}"), String::new(), Value::Null),
    };
    let mut values = row.values().to_vec();
    values.push(Value::Integer(1));
    values.push(Value::String(description));
    values.push(if fields.is_empty() { Value::Null } else { Value::String(fields) });
    values.push(code);
    Row::new(values)
  }

  /// Returns a description of the breached threshold, if any.
  pub fn breached(&self, rejected: u64, read: u64) -> Option<String> {
    if let Some(max) = self.max_errors {
      if rejected > max {
        return Some(format!("{rejected} rows rejected, the maximum is {max}"));
      }
    }
    let pct_limit = self.max_percent_errors?;
    let min_rows = self.min_rows_for_percent.unwrap_or(0);
    if rejected == 0 || read == 0 || read < min_rows {
      return None;
    }
    let pct = (100 * rejected).div_ceil(read);
    if pct > u64::from(pct_limit) {
      Some(format!(
        "{pct}% of rows rejected ({rejected} of {read} read), the maximum is {pct_limit}%"
      ))
    } else {
      None
    }
  }
}
