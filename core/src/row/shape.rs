// stepflow/src/row/shape.rs

//! `RowShape`: the ordered list of value descriptors a row is aligned with.
//!
//! The name lookup is the part of the row model that is shared between
//! threads: a step may extend its output shape while a downstream copy clones
//! or queries it. Every structural mutation therefore builds a brand new
//! [`ShapeSnapshot`] (descriptors and lookup together) and swaps it in under
//! a `parking_lot::RwLock`. Readers grab the current `Arc<ShapeSnapshot>` and
//! release the lock immediately, so a lookup can never combine the lookup
//! table of one version with the descriptor list of another.

use super::descriptor::ValueDescriptor;
use crate::error::{StepflowError, StepflowResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// An immutable version of a row shape.
#[derive(Debug)]
pub struct ShapeSnapshot {
  descriptors: Vec<ValueDescriptor>,
  // Keys are lower-cased: names are matched case-insensitively.
  lookup: HashMap<String, usize>,
  generation: u64,
}

impl ShapeSnapshot {
  fn build(descriptors: Vec<ValueDescriptor>, generation: u64) -> Self {
    let lookup = descriptors
      .iter()
      .enumerate()
      .map(|(idx, d)| (d.name().to_ascii_lowercase(), idx))
      .collect();
    Self {
      descriptors,
      lookup,
      generation,
    }
  }

  pub fn index_of(&self, name: &str) -> Option<usize> {
    self.lookup.get(&name.to_ascii_lowercase()).copied()
  }

  pub fn descriptor(&self, index: usize) -> Option<&ValueDescriptor> {
    self.descriptors.get(index)
  }

  pub fn search(&self, name: &str) -> Option<&ValueDescriptor> {
    self.index_of(name).and_then(|idx| self.descriptors.get(idx))
  }

  pub fn descriptors(&self) -> &[ValueDescriptor] {
    &self.descriptors
  }

  pub fn len(&self) -> usize {
    self.descriptors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.descriptors.is_empty()
  }

  pub fn generation(&self) -> u64 {
    self.generation
  }
}

/// Ordered, name-unique sequence of [`ValueDescriptor`]s.
///
/// `clone` is cheap (it shares the current snapshot) and yields an
/// independently mutable shape.
#[derive(Serialize, Deserialize)]
#[serde(from = "Vec<ValueDescriptor>", into = "Vec<ValueDescriptor>")]
pub struct RowShape {
  current: RwLock<Arc<ShapeSnapshot>>,
}

impl RowShape {
  pub fn new() -> Self {
    Self::from_descriptors(Vec::new())
  }

  /// Builds a shape; duplicate names are renamed the same way `add_value` does.
  pub fn from_descriptors(descriptors: impl IntoIterator<Item = ValueDescriptor>) -> Self {
    let mut unique: Vec<ValueDescriptor> = Vec::new();
    for d in descriptors {
      let name = unique_name(&unique, d.name());
      unique.push(if name == d.name() { d } else { d.renamed(name) });
    }
    Self {
      current: RwLock::new(Arc::new(ShapeSnapshot::build(unique, 0))),
    }
  }

  /// The current version. Holding it does not block writers.
  pub fn snapshot(&self) -> Arc<ShapeSnapshot> {
    Arc::clone(&self.current.read())
  }

  fn mutate<R>(&self, f: impl FnOnce(&mut Vec<ValueDescriptor>) -> StepflowResult<R>) -> StepflowResult<R> {
    let mut guard = self.current.write();
    let mut descriptors = guard.descriptors.clone();
    let out = f(&mut descriptors)?;
    let next = ShapeSnapshot::build(descriptors, guard.generation + 1);
    *guard = Arc::new(next);
    Ok(out)
  }

  /// Appends a descriptor. If the name is taken, the new value is renamed
  /// (`name_1`, `name_2`, ...). Returns the name actually used.
  pub fn add_value(&self, descriptor: ValueDescriptor) -> String {
    let mut guard = self.current.write();
    let mut descriptors = guard.descriptors.clone();
    let name = unique_name(&descriptors, descriptor.name());
    descriptors.push(descriptor.renamed(name.clone()));
    let next = ShapeSnapshot::build(descriptors, guard.generation + 1);
    *guard = Arc::new(next);
    name
  }

  /// Inserts a descriptor at `index`, shifting later values right.
  pub fn insert_value(&self, index: usize, descriptor: ValueDescriptor) -> StepflowResult<String> {
    self.mutate(|descriptors| {
      if index > descriptors.len() {
        return Err(StepflowError::InvalidShapeEdit(format!(
          "insert position {index} is out of bounds for a shape of {} values",
          descriptors.len()
        )));
      }
      let name = unique_name(descriptors, descriptor.name());
      descriptors.insert(index, descriptor.renamed(name.clone()));
      Ok(name)
    })
  }

  /// Removes the named value. Positions of later values shift left.
  pub fn remove_value(&self, name: &str) -> Option<ValueDescriptor> {
    self
      .mutate(|descriptors| {
        let idx = descriptors
          .iter()
          .position(|d| d.name().eq_ignore_ascii_case(name))
          .ok_or_else(|| StepflowError::FieldNotFound { field: name.to_string() })?;
        Ok(descriptors.remove(idx))
      })
      .ok()
  }

  pub fn rename_value(&self, old_name: &str, new_name: &str) -> StepflowResult<()> {
    self.mutate(|descriptors| {
      let idx = descriptors
        .iter()
        .position(|d| d.name().eq_ignore_ascii_case(old_name))
        .ok_or_else(|| StepflowError::FieldNotFound {
          field: old_name.to_string(),
        })?;
      let clash = descriptors
        .iter()
        .enumerate()
        .any(|(i, d)| i != idx && d.name().eq_ignore_ascii_case(new_name));
      if clash {
        return Err(StepflowError::InvalidShapeEdit(format!(
          "cannot rename '{old_name}' to '{new_name}': name already in use"
        )));
      }
      descriptors[idx] = descriptors[idx].renamed(new_name);
      Ok(())
    })
  }

  /// Appends all values of `other` (renaming clashes).
  pub fn merge(&self, other: &RowShape) {
    let incoming = other.snapshot();
    let mut guard = self.current.write();
    let mut descriptors = guard.descriptors.clone();
    for d in incoming.descriptors() {
      let name = unique_name(&descriptors, d.name());
      descriptors.push(d.renamed(name));
    }
    let next = ShapeSnapshot::build(descriptors, guard.generation + 1);
    *guard = Arc::new(next);
  }

  pub fn index_of(&self, name: &str) -> Option<usize> {
    self.snapshot().index_of(name)
  }

  pub fn require_index(&self, name: &str) -> StepflowResult<usize> {
    self.index_of(name).ok_or_else(|| StepflowError::FieldNotFound {
      field: name.to_string(),
    })
  }

  pub fn descriptor(&self, index: usize) -> Option<ValueDescriptor> {
    self.snapshot().descriptor(index).cloned()
  }

  pub fn search(&self, name: &str) -> Option<ValueDescriptor> {
    self.snapshot().search(name).cloned()
  }

  pub fn len(&self) -> usize {
    self.snapshot().len()
  }

  pub fn is_empty(&self) -> bool {
    self.snapshot().is_empty()
  }

  pub fn names(&self) -> Vec<String> {
    self.snapshot().descriptors().iter().map(|d| d.name().to_string()).collect()
  }

  /// Bumped on every structural mutation of this shape.
  pub fn generation(&self) -> u64 {
    self.snapshot().generation()
  }
}

fn unique_name(existing: &[ValueDescriptor], wanted: &str) -> String {
  let taken = |candidate: &str| existing.iter().any(|d| d.name().eq_ignore_ascii_case(candidate));
  if !taken(wanted) {
    return wanted.to_string();
  }
  let mut suffix = 1;
  loop {
    let candidate = format!("{wanted}_{suffix}");
    if !taken(&candidate) {
      return candidate;
    }
    suffix += 1;
  }
}

impl Clone for RowShape {
  fn clone(&self) -> Self {
    Self {
      current: RwLock::new(self.snapshot()),
    }
  }
}

impl Default for RowShape {
  fn default() -> Self {
    Self::new()
  }
}

impl PartialEq for RowShape {
  fn eq(&self, other: &Self) -> bool {
    self.snapshot().descriptors() == other.snapshot().descriptors()
  }
}

impl fmt::Debug for RowShape {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let snapshot = self.snapshot();
    f.debug_struct("RowShape")
      .field("values", &snapshot.descriptors())
      .field("generation", &snapshot.generation())
      .finish()
  }
}

impl From<Vec<ValueDescriptor>> for RowShape {
  fn from(descriptors: Vec<ValueDescriptor>) -> Self {
    Self::from_descriptors(descriptors)
  }
}

impl From<RowShape> for Vec<ValueDescriptor> {
  fn from(shape: RowShape) -> Self {
    shape.snapshot().descriptors().to_vec()
  }
}
