// tests/row_model_tests.rs

mod common;

use chrono::NaiveDate;
use common::*;
use std::sync::Arc;
use std::thread;
use stepflow::{Decimal, Row, RowShape, StepflowError, Value, ValueDescriptor, ValueType};

fn customer_shape() -> RowShape {
  RowShape::from_descriptors(vec![
    ValueDescriptor::integer("id"),
    ValueDescriptor::string("Name").with_length(40),
    ValueDescriptor::number("balance").with_precision(2),
  ])
}

#[test]
fn lookup_ignores_case() {
  setup_tracing();
  let shape = customer_shape();
  assert_eq!(shape.index_of("name"), Some(1));
  assert_eq!(shape.index_of("NAME"), Some(1));
  assert_eq!(shape.index_of("missing"), None);
  assert_eq!(shape.search("BALANCE").unwrap().value_type(), ValueType::Number);
  assert!(matches!(
    shape.require_index("missing"),
    Err(StepflowError::FieldNotFound { ref field }) if field == "missing"
  ));

  let row = Row::from(vec![Value::Integer(7), Value::from("Ada"), Value::Number(12.5)]);
  assert_eq!(row.get_by_name(&shape, "Name").unwrap(), &Value::String("Ada".into()));
}

#[test]
fn structural_edits_keep_lookup_consistent() {
  setup_tracing();
  let shape = customer_shape();
  let before = shape.generation();

  assert_eq!(shape.insert_value(0, ValueDescriptor::string("region")).unwrap(), "region");
  assert_eq!(shape.names(), vec!["region", "id", "Name", "balance"]);
  assert_eq!(shape.index_of("id"), Some(1));

  shape.rename_value("balance", "amount").unwrap();
  assert_eq!(shape.index_of("amount"), Some(3));
  assert_eq!(shape.index_of("balance"), None);
  assert!(
    matches!(shape.rename_value("amount", "ID"), Err(StepflowError::InvalidShapeEdit(_))),
    "renaming onto a taken name must fail"
  );
  assert!(matches!(
    shape.rename_value("ghost", "spirit"),
    Err(StepflowError::FieldNotFound { .. })
  ));

  let removed = shape.remove_value("REGION").unwrap();
  assert_eq!(removed.name(), "region");
  assert_eq!(shape.index_of("id"), Some(0));
  assert!(shape.remove_value("region").is_none());

  assert!(shape.generation() > before);
}

#[test]
fn rejected_shape_edits_leave_the_shape_alone() {
  setup_tracing();
  let shape = customer_shape();
  let names = shape.names();
  let generation = shape.generation();

  let err = shape.insert_value(99, ValueDescriptor::string("late")).unwrap_err();
  assert!(matches!(err, StepflowError::InvalidShapeEdit(_)), "{err}");
  assert!(err.to_string().contains("out of bounds"));
  assert!(matches!(
    shape.rename_value("balance", "NAME"),
    Err(StepflowError::InvalidShapeEdit(_))
  ));

  assert_eq!(shape.names(), names);
  assert_eq!(shape.generation(), generation);
  assert_eq!(shape.index_of("balance"), Some(2));
}

#[test]
fn merge_appends_every_value_renaming_clashes() {
  setup_tracing();
  let shape = customer_shape();
  let other = RowShape::from_descriptors(vec![ValueDescriptor::string("NAME"), ValueDescriptor::string("email")]);
  shape.merge(&other);
  assert_eq!(shape.names(), vec!["id", "Name", "balance", "NAME_1", "email"]);
}

#[test]
fn duplicate_descriptors_are_renamed_on_construction() {
  setup_tracing();
  let shape = RowShape::from_descriptors(vec![
    ValueDescriptor::integer("id"),
    ValueDescriptor::integer("ID"),
    ValueDescriptor::integer("id"),
  ]);
  assert_eq!(shape.names(), vec!["id", "ID_1", "id_2"]);
}

#[test]
fn snapshots_never_change_under_a_reader() {
  setup_tracing();
  let shape = customer_shape();
  let snapshot = shape.snapshot();
  shape.add_value(ValueDescriptor::string("email"));
  assert_eq!(snapshot.len(), 3);
  assert_eq!(snapshot.index_of("email"), None);
  assert_eq!(shape.snapshot().index_of("email"), Some(3));
}

#[test]
fn concurrent_readers_always_see_a_consistent_shape() {
  setup_tracing();
  let shape = Arc::new(RowShape::from_descriptors(vec![ValueDescriptor::integer("base")]));

  let writer = {
    let shape = Arc::clone(&shape);
    thread::spawn(move || {
      for i in 0..500 {
        shape.add_value(ValueDescriptor::integer(format!("f{i}")));
        if i % 3 == 0 {
          shape.remove_value(&format!("f{}", i / 2));
        }
      }
    })
  };
  let readers: Vec<_> = (0..4)
    .map(|_| {
      let shape = Arc::clone(&shape);
      thread::spawn(move || {
        for _ in 0..2_000 {
          let snapshot = shape.snapshot();
          // Every descriptor is found at its own position in the same version.
          for (idx, descriptor) in snapshot.descriptors().iter().enumerate() {
            assert_eq!(snapshot.index_of(descriptor.name()), Some(idx));
          }
          let copy = shape.as_ref().clone();
          assert_eq!(copy.index_of("base"), Some(0));
        }
      })
    })
    .collect();

  writer.join().unwrap();
  for reader in readers {
    reader.join().unwrap();
  }
}

#[test]
fn rows_are_checked_against_their_shape() {
  setup_tracing();
  let shape = customer_shape();
  let good = Row::from(vec![Value::Integer(1), Value::Null, Value::Number(0.0)]);
  assert!(good.check_against(&shape).is_ok());

  let short = Row::from(vec![Value::Integer(1)]);
  assert!(matches!(
    short.check_against(&shape),
    Err(StepflowError::ShapeMismatch { expected: 3, actual: 1 })
  ));
}

#[test]
fn values_expose_their_type() {
  setup_tracing();
  let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap().and_hms_opt(12, 0, 0).unwrap();
  let values = [
    (Value::from("x"), Some(ValueType::String)),
    (Value::from(3_i64), Some(ValueType::Integer)),
    (Value::from(1.5_f64), Some(ValueType::Number)),
    (Value::from(Decimal::new(12_345, 2)), Some(ValueType::BigNumber)),
    (Value::from(true), Some(ValueType::Boolean)),
    (Value::from(date), Some(ValueType::Date)),
    (Value::Binary(vec![1, 2]), Some(ValueType::Binary)),
    (Value::Null, None),
  ];
  for (value, expected) in values {
    assert_eq!(value.value_type(), expected, "{value:?}");
  }
  assert_eq!(Decimal::new(12_345, 2).to_string(), "123.45");
  assert_eq!(Value::Integer(4).as_number(), Some(4.0));
  assert!(Value::Null.is_null());
}
