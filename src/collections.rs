// Copyright 2018-2024 the Deno authors. MIT license.

use indexmap::IndexMap;

/// Collection useful for a breadth first pass where the pending items
/// are the same values as the seen items.
///
/// Each item remembers the item it was reached from so that the path
/// back to the first item can be reconstructed.
pub struct SeenPendingCollection<T: std::hash::Hash + Eq + Clone> {
  inner: IndexMap<T, Option<usize>>,
  next_index: usize,
}

impl<T: std::hash::Hash + Eq + Clone> SeenPendingCollection<T> {
  pub fn with_capacity(capacity: usize) -> Self {
    Self {
      inner: IndexMap::with_capacity(capacity),
      next_index: 0,
    }
  }

  pub fn has_seen(&self, item: &T) -> bool {
    self.inner.contains_key(item)
  }

  /// Adds an item, returning `false` if it was already seen.
  pub fn add(&mut self, item: T, maybe_reached_from: Option<&T>) -> bool {
    if self.inner.contains_key(&item) {
      return false;
    }
    let reached_from =
      maybe_reached_from.and_then(|from| self.inner.get_index_of(from));
    self.inner.insert(item, reached_from);
    true
  }

  pub fn next_pending(&mut self) -> Option<T> {
    let next = self.inner.get_index(self.next_index);
    if next.is_some() {
      self.next_index += 1;
    }
    next.map(|(item, _)| item.clone())
  }

  /// Walks from the provided item back to the item the pass started at.
  ///
  /// The returned path starts with `item` and ends with the first item.
  pub fn path_to(&self, item: &T) -> Vec<T> {
    let mut path = Vec::new();
    let mut maybe_index = self.inner.get_index_of(item);
    while let Some(index) = maybe_index {
      let Some((item, reached_from)) = self.inner.get_index(index) else {
        break;
      };
      path.push(item.clone());
      maybe_index = *reached_from;
    }
    path
  }
}
