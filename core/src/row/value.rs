// stepflow/src/row/value.rs

//! The closed set of value types a row can carry.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
  String,
  Integer,
  Number,
  BigNumber,
  Boolean,
  Date,
  Binary,
  Serializable,
}

impl fmt::Display for ValueType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ValueType::String => "String",
      ValueType::Integer => "Integer",
      ValueType::Number => "Number",
      ValueType::BigNumber => "BigNumber",
      ValueType::Boolean => "Boolean",
      ValueType::Date => "Date",
      ValueType::Binary => "Binary",
      ValueType::Serializable => "Serializable",
    };
    f.write_str(name)
  }
}

/// Exact decimal: `unscaled * 10^-scale`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Decimal {
  pub unscaled: i128,
  pub scale: u32,
}

impl Decimal {
  pub fn new(unscaled: i128, scale: u32) -> Self {
    Self { unscaled, scale }
  }

  /// Strips trailing zeros so that `1.50` and `1.5` compare and hash equal.
  pub fn normalized(self) -> Self {
    let mut d = self;
    while d.scale > 0 && d.unscaled % 10 == 0 {
      d.unscaled /= 10;
      d.scale -= 1;
    }
    d
  }
}

impl fmt::Display for Decimal {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.scale == 0 {
      return write!(f, "{}", self.unscaled);
    }
    let sign = if self.unscaled < 0 { "-" } else { "" };
    let digits = self.unscaled.unsigned_abs().to_string();
    let scale = self.scale as usize;
    if digits.len() > scale {
      let (int_part, frac_part) = digits.split_at(digits.len() - scale);
      write!(f, "{sign}{int_part}.{frac_part}")
    } else {
      write!(f, "{sign}0.{}{digits}", "0".repeat(scale - digits.len()))
    }
  }
}

/// One cell of a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
  Null,
  String(String),
  Integer(i64),
  Number(f64),
  BigNumber(Decimal),
  Boolean(bool),
  Date(NaiveDateTime),
  Binary(Vec<u8>),
  Serializable(Vec<u8>),
}

impl Value {
  pub fn is_null(&self) -> bool {
    matches!(self, Value::Null)
  }

  /// The type of a non-null value.
  pub fn value_type(&self) -> Option<ValueType> {
    match self {
      Value::Null => None,
      Value::String(_) => Some(ValueType::String),
      Value::Integer(_) => Some(ValueType::Integer),
      Value::Number(_) => Some(ValueType::Number),
      Value::BigNumber(_) => Some(ValueType::BigNumber),
      Value::Boolean(_) => Some(ValueType::Boolean),
      Value::Date(_) => Some(ValueType::Date),
      Value::Binary(_) => Some(ValueType::Binary),
      Value::Serializable(_) => Some(ValueType::Serializable),
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::String(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_integer(&self) -> Option<i64> {
    match self {
      Value::Integer(i) => Some(*i),
      _ => None,
    }
  }

  pub fn as_number(&self) -> Option<f64> {
    match self {
      Value::Number(n) => Some(*n),
      Value::Integer(i) => Some(*i as f64),
      _ => None,
    }
  }
}

// f64 has no Hash; floats hash by bit pattern with -0.0 folded into 0.0 and
// every NaN folded into one, so equal keys always land on the same copy.
impl Hash for Value {
  fn hash<H: Hasher>(&self, state: &mut H) {
    std::mem::discriminant(self).hash(state);
    match self {
      Value::Null => {}
      Value::String(s) => s.hash(state),
      Value::Integer(i) => i.hash(state),
      Value::Number(n) => {
        let canonical = if *n == 0.0 {
          0.0f64
        } else if n.is_nan() {
          f64::NAN
        } else {
          *n
        };
        canonical.to_bits().hash(state);
      }
      Value::BigNumber(d) => d.normalized().hash(state),
      Value::Boolean(b) => b.hash(state),
      Value::Date(d) => d.hash(state),
      Value::Binary(b) | Value::Serializable(b) => b.hash(state),
    }
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::Null => f.write_str("<null>"),
      Value::String(s) => f.write_str(s),
      Value::Integer(i) => write!(f, "{i}"),
      Value::Number(n) => write!(f, "{n}"),
      Value::BigNumber(d) => write!(f, "{d}"),
      Value::Boolean(b) => write!(f, "{b}"),
      Value::Date(d) => write!(f, "{}", d.format("%Y/%m/%d %H:%M:%S%.3f")),
      Value::Binary(b) | Value::Serializable(b) => write!(f, "<{} bytes>", b.len()),
    }
  }
}

impl From<&str> for Value {
  fn from(s: &str) -> Self {
    Value::String(s.to_string())
  }
}

impl From<String> for Value {
  fn from(s: String) -> Self {
    Value::String(s)
  }
}

impl From<i64> for Value {
  fn from(i: i64) -> Self {
    Value::Integer(i)
  }
}

impl From<f64> for Value {
  fn from(n: f64) -> Self {
    Value::Number(n)
  }
}

impl From<bool> for Value {
  fn from(b: bool) -> Self {
    Value::Boolean(b)
  }
}

impl From<NaiveDateTime> for Value {
  fn from(d: NaiveDateTime) -> Self {
    Value::Date(d)
  }
}

impl From<Decimal> for Value {
  fn from(d: Decimal) -> Self {
    Value::BigNumber(d)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::hash_map::DefaultHasher;

  fn hash_of(v: &Value) -> u64 {
    let mut h = DefaultHasher::new();
    v.hash(&mut h);
    h.finish()
  }

  #[test]
  fn negative_zero_hashes_like_zero() {
    assert_eq!(hash_of(&Value::Number(-0.0)), hash_of(&Value::Number(0.0)));
  }

  #[test]
  fn decimal_scale_does_not_change_hash() {
    let a = Value::BigNumber(Decimal::new(150, 2));
    let b = Value::BigNumber(Decimal::new(15, 1));
    assert_eq!(hash_of(&a), hash_of(&b));
  }

  #[test]
  fn decimal_display() {
    assert_eq!(Decimal::new(12345, 2).to_string(), "123.45");
    assert_eq!(Decimal::new(-5, 3).to_string(), "-0.005");
    assert_eq!(Decimal::new(7, 0).to_string(), "7");
  }
}
