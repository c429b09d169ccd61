// Copyright 2018-2024 the Deno authors. MIT license.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

use fake_imports::coverage::CoverageOptions;
use fake_imports::source::registry::ModuleRegistry;
use fake_imports::source::MemoryLoader;
use fake_imports::FakeModule;
use fake_imports::ForceRealMode;
use fake_imports::ImportError;
use fake_imports::ImportMapSource;
use fake_imports::ImportResolver;
use fake_imports::ImportResolverOptions;
use fake_imports::ModuleArtifact;
use fake_imports::ModuleSpecifier;
use fake_imports::ResolvedImport;

use super::indent;

/// A registry with readable locators: `blob:` followed by the url of the
/// module, with a `#real` suffix for modules loaded with fakes disabled.
#[derive(Default)]
pub struct TestRegistry {
  artifacts: RefCell<BTreeMap<String, Arc<ModuleArtifact>>>,
}

impl TestRegistry {
  pub fn artifacts(&self) -> BTreeMap<String, Arc<ModuleArtifact>> {
    self.artifacts.borrow().clone()
  }

  pub fn get(&self, locator: &str) -> Option<Arc<ModuleArtifact>> {
    self.artifacts.borrow().get(locator).cloned()
  }

  pub fn len(&self) -> usize {
    self.artifacts.borrow().len()
  }
}

impl ModuleRegistry for TestRegistry {
  fn register(&self, artifact: Arc<ModuleArtifact>) -> String {
    let mut artifacts = self.artifacts.borrow_mut();
    let mut locator = format!("blob:{}", artifact.identity.specifier);
    if !artifact.identity.allow_fakes {
      locator.push_str("#real");
    }
    if artifacts.contains_key(&locator) {
      locator = format!("{}#{}", locator, artifacts.len());
    }
    artifacts.insert(locator.clone(), artifact);
    locator
  }
}

pub struct BuildResult {
  pub result: Result<ResolvedImport, ImportError>,
  pub resolver: ImportResolver,
  pub loader: Rc<MemoryLoader>,
  pub registry: Rc<TestRegistry>,
}

impl BuildResult {
  pub fn content(&self, locator: &str) -> String {
    self.registry.get(locator).unwrap().content.to_string()
  }

  /// Renders the entry and every built module, or only the error when the
  /// import failed.
  pub fn output(&self) -> String {
    let resolved = match &self.result {
      Ok(resolved) => resolved,
      Err(err) => return format!("error: {}\n", err),
    };
    let mut text = format!("entry: {}\n", resolved.locator());
    for (locator, artifact) in self.registry.artifacts() {
      text.push_str(&format!("{} ({})\n", locator, artifact.content_type));
      if !artifact.content.is_empty() {
        text.push_str(&indent(&artifact.content));
        text.push('\n');
      }
    }
    if let Ok(coverage_map) = self.resolver.coverage_map() {
      for (locator, entry) in coverage_map {
        text.push_str(&format!(
          "coverage {} -> {}: {}\n",
          locator,
          entry.original_url,
          serde_json::to_string(&entry.diff_offsets).unwrap()
        ));
      }
    }
    text
  }
}

pub struct TestBuilder {
  loader: MemoryLoader,
  base: String,
  entry_point: String,
  fakes: Vec<(String, FakeModule)>,
  redirects: Vec<(String, String)>,
  reals: Vec<(String, ForceRealMode)>,
  import_map: Option<ImportMapSource>,
  import_map_entries_real: bool,
  coverage: Option<CoverageOptions>,
}

impl TestBuilder {
  pub fn new() -> Self {
    Self {
      loader: Default::default(),
      base: "file:///".to_string(),
      entry_point: "./main.js".to_string(),
      fakes: Default::default(),
      redirects: Default::default(),
      reals: Default::default(),
      import_map: None,
      import_map_entries_real: true,
      coverage: None,
    }
  }

  pub fn with_loader(
    &mut self,
    mut action: impl FnMut(&mut MemoryLoader),
  ) -> &mut Self {
    action(&mut self.loader);
    self
  }

  #[allow(dead_code)]
  pub fn entry_point(&mut self, value: impl AsRef<str>) -> &mut Self {
    self.entry_point = value.as_ref().to_string();
    self
  }

  pub fn fake(
    &mut self,
    specifier: impl AsRef<str>,
    implementation: impl Into<FakeModule>,
  ) -> &mut Self {
    self
      .fakes
      .push((specifier.as_ref().to_string(), implementation.into()));
    self
  }

  pub fn redirect(
    &mut self,
    specifier: impl AsRef<str>,
    target: impl AsRef<str>,
  ) -> &mut Self {
    self
      .redirects
      .push((specifier.as_ref().to_string(), target.as_ref().to_string()));
    self
  }

  pub fn make_real(
    &mut self,
    specifier: impl AsRef<str>,
    mode: ForceRealMode,
  ) -> &mut Self {
    self.reals.push((specifier.as_ref().to_string(), mode));
    self
  }

  pub fn import_map(&mut self, import_map: ImportMapSource) -> &mut Self {
    self.import_map = Some(import_map);
    self
  }

  pub fn import_map_entries_real(&mut self, value: bool) -> &mut Self {
    self.import_map_entries_real = value;
    self
  }

  pub fn coverage(&mut self, options: CoverageOptions) -> &mut Self {
    self.coverage = Some(options);
    self
  }

  /// Creates a session with everything registered so far.
  pub fn resolver(&mut self) -> (ImportResolver, Rc<MemoryLoader>, Rc<TestRegistry>) {
    let loader = Rc::new(std::mem::take(&mut self.loader));
    let registry = Rc::new(TestRegistry::default());
    let resolver = ImportResolver::new(
      ModuleSpecifier::parse(&self.base).unwrap(),
      loader.clone(),
      registry.clone(),
      ImportResolverOptions {
        import_map: self.import_map.clone(),
        import_map_entries_real: self.import_map_entries_real,
        coverage: self.coverage.clone(),
        ..Default::default()
      },
    );
    for (specifier, implementation) in &self.fakes {
      resolver
        .register_fake_module(specifier, implementation.clone())
        .unwrap();
    }
    for (specifier, target) in &self.redirects {
      resolver.register_redirect_module(specifier, target).unwrap();
    }
    for (specifier, mode) in &self.reals {
      resolver.make_real(specifier, *mode);
    }
    (resolver, loader, registry)
  }

  pub async fn build(&mut self) -> BuildResult {
    let (resolver, loader, registry) = self.resolver();
    let result = resolver.import(&self.entry_point).await;
    BuildResult {
      result,
      resolver,
      loader,
      registry,
    }
  }
}
