// Copyright 2018-2024 the Deno authors. MIT license.

use std::cell::RefCell;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::graph::ModuleArtifact;

/// Hands rewritten modules to the execution host.
///
/// The returned locator is what importers of the module are rewritten to
/// import, so it must be something the host can load the artifact with.
pub trait ModuleRegistry {
  fn register(&self, artifact: Arc<ModuleArtifact>) -> String;
}

static NEXT_REGISTRY_ID: AtomicUsize = AtomicUsize::new(0);

/// Keeps every artifact in memory under a `blob:` style locator that is
/// unique across registries.
#[derive(Debug)]
pub struct MemoryModuleRegistry {
  id: usize,
  artifacts: RefCell<IndexMap<String, Arc<ModuleArtifact>>>,
}

impl Default for MemoryModuleRegistry {
  fn default() -> Self {
    Self {
      id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
      artifacts: Default::default(),
    }
  }
}

impl MemoryModuleRegistry {
  pub fn get(&self, locator: &str) -> Option<Arc<ModuleArtifact>> {
    self.artifacts.borrow().get(locator).cloned()
  }

  pub fn len(&self) -> usize {
    self.artifacts.borrow().len()
  }

  pub fn is_empty(&self) -> bool {
    self.artifacts.borrow().is_empty()
  }

  /// Every registered locator in registration order.
  pub fn locators(&self) -> Vec<String> {
    self.artifacts.borrow().keys().cloned().collect()
  }
}

impl ModuleRegistry for MemoryModuleRegistry {
  fn register(&self, artifact: Arc<ModuleArtifact>) -> String {
    let mut artifacts = self.artifacts.borrow_mut();
    let locator = format!("blob:fake-imports/{}/{}", self.id, artifacts.len());
    artifacts.insert(locator.clone(), artifact);
    locator
  }
}
