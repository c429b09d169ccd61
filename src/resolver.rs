// Copyright 2018-2024 the Deno authors. MIT license.

use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::Arc;

use deno_unsync::future::LocalFutureExt;
use deno_unsync::future::SharedLocal;
use futures::future;
use futures::future::LocalBoxFuture;
use futures::Future;
use futures::FutureExt;
use indexmap::IndexSet;
use serde_json::Value;

use crate::analyzer::DefaultModuleAnalyzer;
use crate::analyzer::ModuleAnalyzer;
use crate::coverage::compute_diff_offsets;
use crate::coverage::CoverageDisabledError;
use crate::coverage::CoverageListenerId;
use crate::coverage::CoverageMap;
use crate::coverage::CoverageMapEntry;
use crate::coverage::CoverageOptions;
use crate::coverage::CoverageState;
use crate::graph::ContentSource;
use crate::graph::FakeModule;
use crate::graph::FetchContext;
use crate::graph::GraphNode;
use crate::graph::ImportError;
use crate::graph::LoadedModule;
use crate::graph::ModuleArtifact;
use crate::graph::ModuleGraph;
use crate::graph::ModuleResult;
use crate::graph::NodeId;
use crate::graph::NodeState;
use crate::graph::OriginalModule;
use crate::graph::ResolvedIdentity;
use crate::import_map::ImportMap;
use crate::module_specifier::resolve_import;
use crate::module_specifier::ModuleSpecifier;
use crate::module_specifier::SpecifierError;
use crate::rewrite::replace_imports;
use crate::rt::spawn;
use crate::rt::DefaultExecutor;
use crate::rt::Executor;
use crate::source::content_type_for_media_type;
use crate::source::load_data_url;
use crate::source::registry::ModuleRegistry;
use crate::source::resolve_media_type_and_charset_from_headers;
use crate::source::LoadError;
use crate::source::Loader;
use crate::text_encoding::decode_source;

/// Where the import map of a session comes from.
#[derive(Debug, Clone)]
pub enum ImportMapSource {
  Inline(Value),
  /// Resolved against the base of the session and loaded once, before the
  /// first import.
  Url(String),
}

/// How a module marked as real is left alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ForceRealMode {
  /// The specifier is matched exactly as it is written in an import,
  /// before import map resolution, and is left untouched.
  BypassResolution,
  /// The specifier is resolved, and imports resolving to the same url are
  /// replaced with that url instead of a rewritten module.
  #[default]
  BypassNodeCreation,
}

pub struct ImportResolverOptions {
  pub import_map: Option<ImportMapSource>,
  /// Mark every key of the import map as real using
  /// [`ForceRealMode::BypassResolution`], leaving the mapping of those
  /// specifiers to the execution host.
  pub import_map_entries_real: bool,
  /// Coverage map generation is disabled when this is `None`.
  pub coverage: Option<CoverageOptions>,
  /// Defaults to [`DefaultModuleAnalyzer`].
  pub analyzer: Option<Rc<dyn ModuleAnalyzer>>,
  /// Defaults to [`DefaultExecutor`].
  pub executor: Option<Rc<dyn Executor>>,
}

impl Default for ImportResolverOptions {
  fn default() -> Self {
    Self {
      import_map: None,
      import_map_entries_real: true,
      coverage: None,
      analyzer: None,
      executor: None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedImport {
  Module(Arc<LoadedModule>),
  /// The specifier was marked as real and is to be imported as is.
  Real(String),
}

impl ResolvedImport {
  /// What the execution host should import.
  pub fn locator(&self) -> &str {
    match self {
      ResolvedImport::Module(module) => &module.locator,
      ResolvedImport::Real(specifier) => specifier,
    }
  }

  pub fn maybe_module(&self) -> Option<&Arc<LoadedModule>> {
    match self {
      ResolvedImport::Module(module) => Some(module),
      ResolvedImport::Real(_) => None,
    }
  }
}

/// An import session.
///
/// Fakes, redirects and modules marked as real only apply to the session
/// they were registered with, and modules are built at most once per
/// session.
#[derive(Clone)]
pub struct ImportResolver {
  inner: Rc<ResolverInner>,
}

impl ImportResolver {
  /// Creates a session. Specifiers given to the session are resolved
  /// relative to `base`.
  pub fn new(
    base: ModuleSpecifier,
    loader: Rc<dyn Loader>,
    registry: Rc<dyn ModuleRegistry>,
    options: ImportResolverOptions,
  ) -> Self {
    Self {
      inner: Rc::new(ResolverInner {
        base,
        loader,
        registry,
        analyzer: options
          .analyzer
          .unwrap_or_else(|| Rc::new(DefaultModuleAnalyzer)),
        executor: options
          .executor
          .unwrap_or_else(|| Rc::new(DefaultExecutor)),
        import_map_entries_real: options.import_map_entries_real,
        maybe_import_map_source: options.import_map,
        import_map: Default::default(),
        import_map_install: Default::default(),
        fakes: Default::default(),
        redirects: Default::default(),
        real_specifiers: Default::default(),
        real_urls: Default::default(),
        pending_real_urls: Default::default(),
        graph: Default::default(),
        maybe_coverage: options.coverage.map(CoverageState::new),
      }),
    }
  }

  pub fn base(&self) -> &ModuleSpecifier {
    &self.inner.base
  }

  /// Replaces the module at the specifier with the fake for every import
  /// that does not come from the fake itself.
  pub fn register_fake_module(
    &self,
    specifier: &str,
    implementation: impl Into<FakeModule>,
  ) -> Result<(), SpecifierError> {
    let specifier = resolve_import(specifier, &self.inner.base)?;
    log::debug!("Registered fake for {}", specifier);
    self
      .inner
      .fakes
      .borrow_mut()
      .insert(specifier, implementation.into());
    Ok(())
  }

  /// Loads the content of `target` wherever `specifier` is imported.
  ///
  /// Redirects are followed before fakes are looked up, so a fake
  /// registered for the target applies to the redirected module.
  pub fn register_redirect_module(
    &self,
    specifier: &str,
    target: &str,
  ) -> Result<(), SpecifierError> {
    let specifier = resolve_import(specifier, &self.inner.base)?;
    let target = resolve_import(target, &self.inner.base)?;
    log::debug!("Registered redirect from {} to {}", specifier, target);
    self.inner.redirects.borrow_mut().insert(specifier, target);
    Ok(())
  }

  /// Excludes a module from being rewritten.
  ///
  /// A fake registered for the same module takes precedence over
  /// [`ForceRealMode::BypassNodeCreation`].
  pub fn make_real(&self, specifier: &str, mode: ForceRealMode) {
    match mode {
      ForceRealMode::BypassResolution => {
        self
          .inner
          .real_specifiers
          .borrow_mut()
          .insert(specifier.to_string());
      }
      ForceRealMode::BypassNodeCreation => {
        let maybe_import_map = self.inner.import_map.borrow().clone();
        match maybe_import_map {
          Some(import_map) => self.inner.add_real_url(&import_map, specifier),
          // resolved once the import map is installed
          None => self
            .inner
            .pending_real_urls
            .borrow_mut()
            .push(specifier.to_string()),
        }
      }
    }
  }

  /// Builds the module and everything it imports.
  ///
  /// Modules built by earlier imports of the session are reused. Once the
  /// module is built, pending coverage map entry writes are awaited.
  pub async fn import(
    &self,
    specifier: &str,
  ) -> Result<ResolvedImport, ImportError> {
    self.inner.ensure_import_map().await?;
    let result = match self.inner.request(specifier, None)? {
      Requested::Real(specifier) => ResolvedImport::Real(specifier),
      Requested::Node(id) => {
        let fut = self.inner.graph.borrow().wait(id);
        ResolvedImport::Module(fut.await?)
      }
    };
    if let Some(coverage) = &self.inner.maybe_coverage {
      coverage.finish_writes().await;
    }
    Ok(result)
  }

  /// The modules that were imported as an entry point.
  pub fn roots(&self) -> Vec<ModuleSpecifier> {
    self
      .inner
      .graph
      .borrow()
      .nodes()
      .filter(|node| node.is_root)
      .map(|node| node.identity.specifier.clone())
      .collect()
  }

  /// Every coverage map entry of the session, keyed by replaced url.
  pub fn coverage_map(&self) -> Result<CoverageMap, CoverageDisabledError> {
    if self.inner.maybe_coverage.is_none() {
      return Err(CoverageDisabledError);
    }
    Ok(
      self
        .inner
        .graph
        .borrow()
        .nodes()
        .filter_map(|node| node.maybe_module())
        .filter_map(|module| module.maybe_coverage.clone())
        .map(|entry| (entry.replaced_url.clone(), entry))
        .collect(),
    )
  }

  pub fn on_coverage_map_entry_added(
    &self,
    listener: impl Fn(&CoverageMapEntry) + 'static,
  ) -> Result<CoverageListenerId, CoverageDisabledError> {
    let coverage = self
      .inner
      .maybe_coverage
      .as_ref()
      .ok_or(CoverageDisabledError)?;
    Ok(coverage.add_listener(Rc::new(listener)))
  }

  /// Returns `false` if the listener was not registered.
  pub fn remove_coverage_map_entry_listener(
    &self,
    id: CoverageListenerId,
  ) -> bool {
    match &self.inner.maybe_coverage {
      Some(coverage) => coverage.remove_listener(id),
      None => false,
    }
  }

  /// Resolves once every coverage map entry write has finished, including
  /// writes that start while waiting.
  pub async fn finish_coverage_map_writes(&self) {
    if let Some(coverage) = &self.inner.maybe_coverage {
      coverage.finish_writes().await;
    }
  }
}

enum Requested {
  Real(String),
  Node(NodeId),
}

type ImportMapFuture =
  SharedLocal<LocalBoxFuture<'static, Result<Rc<ImportMap>, ImportError>>>;

struct ResolverInner {
  base: ModuleSpecifier,
  loader: Rc<dyn Loader>,
  registry: Rc<dyn ModuleRegistry>,
  analyzer: Rc<dyn ModuleAnalyzer>,
  executor: Rc<dyn Executor>,
  import_map_entries_real: bool,
  maybe_import_map_source: Option<ImportMapSource>,
  /// Set once the import map is installed.
  import_map: RefCell<Option<Rc<ImportMap>>>,
  import_map_install: RefCell<Option<ImportMapFuture>>,
  fakes: RefCell<HashMap<ModuleSpecifier, FakeModule>>,
  redirects: RefCell<HashMap<ModuleSpecifier, ModuleSpecifier>>,
  real_specifiers: RefCell<HashSet<String>>,
  real_urls: RefCell<HashSet<ModuleSpecifier>>,
  pending_real_urls: RefCell<Vec<String>>,
  graph: RefCell<ModuleGraph>,
  maybe_coverage: Option<CoverageState>,
}

impl ResolverInner {
  async fn ensure_import_map(&self) -> Result<(), ImportError> {
    if self.import_map.borrow().is_some() {
      return Ok(());
    }
    let fut = self
      .import_map_install
      .borrow_mut()
      .get_or_insert_with(|| {
        load_import_map(
          self.maybe_import_map_source.clone(),
          self.base.clone(),
          self.loader.as_ref(),
        )
        .shared_local()
      })
      .clone();
    let import_map = fut.await?;
    // a concurrent import may have installed it while waiting
    if self.import_map.borrow().is_none() {
      self.install_import_map(import_map);
    }
    Ok(())
  }

  fn install_import_map(&self, import_map: Rc<ImportMap>) {
    if self.import_map_entries_real {
      let mut real_specifiers = self.real_specifiers.borrow_mut();
      for key in import_map.specifier_keys() {
        if !key.is_empty() {
          real_specifiers.insert(key.clone());
        }
      }
    }
    let pending = std::mem::take(&mut *self.pending_real_urls.borrow_mut());
    for specifier in pending {
      self.add_real_url(&import_map, &specifier);
    }
    *self.import_map.borrow_mut() = Some(import_map);
  }

  fn add_real_url(&self, import_map: &ImportMap, specifier: &str) {
    match import_map.resolve(specifier, &self.base) {
      Ok(url) => {
        self.real_urls.borrow_mut().insert(url);
      }
      Err(err) => {
        log::warn!("Unable to mark \"{}\" as real: {}", specifier, err);
      }
    }
  }

  /// Resolves an import to what it should be replaced with, creating the
  /// node for it when it was not requested before.
  ///
  /// This never awaits, so that a node is in the graph before anything
  /// else can request the same identity.
  fn request(
    self: &Rc<Self>,
    specifier: &str,
    maybe_parent: Option<NodeId>,
  ) -> Result<Requested, ImportError> {
    if self.real_specifiers.borrow().contains(specifier) {
      log::debug!("Leaving \"{}\" as is, it was marked as real.", specifier);
      return Ok(Requested::Real(specifier.to_string()));
    }

    let import_map = self.import_map.borrow().clone().unwrap_or_default();
    let referrer = match maybe_parent {
      Some(parent) => self.graph.borrow().node(parent).content_specifier().clone(),
      None => self.base.clone(),
    };
    let resolved = import_map.resolve(specifier, &referrer)?;

    // a fake or redirect target importing the module it stands in for gets
    // the original module
    let allow_fakes = match maybe_parent {
      Some(parent) => {
        let graph = self.graph.borrow();
        let parent = graph.node(parent);
        match &parent.source {
          ContentSource::Fetch => true,
          ContentSource::Redirect(_) | ContentSource::Fake { .. } => {
            resolved != parent.identity.specifier
              && &resolved != parent.content_specifier()
          }
        }
      }
      None => true,
    };

    let mut final_specifier = resolved.clone();
    if allow_fakes {
      let redirects = self.redirects.borrow();
      let mut seen = IndexSet::new();
      seen.insert(final_specifier.clone());
      while let Some(target) = redirects.get(&final_specifier) {
        if !seen.insert(target.clone()) {
          let mut chain = seen.into_iter().collect::<Vec<_>>();
          chain.push(target.clone());
          return Err(ImportError::CircularRedirect(chain));
        }
        final_specifier = target.clone();
      }
    }

    let maybe_fake = if allow_fakes {
      self.fakes.borrow().get(&final_specifier).cloned()
    } else {
      None
    };
    let forced_real =
      maybe_fake.is_none() && self.real_urls.borrow().contains(&final_specifier);
    if forced_real && allow_fakes {
      log::debug!("Leaving {} as is, it was marked as real.", final_specifier);
      return Ok(Requested::Real(final_specifier.to_string()));
    }

    let identity = ResolvedIdentity {
      specifier: resolved.clone(),
      allow_fakes,
      forced_real,
    };
    let mut graph = self.graph.borrow_mut();
    if let Some(existing) = graph.get(&identity) {
      match maybe_parent {
        Some(parent) => {
          graph.add_parent(existing, parent);
          if existing == parent {
            return Err(ImportError::SelfImport(identity.specifier));
          }
          if let Some(path) =
            graph.find_closest_circular_import_path(parent, existing)
          {
            return Err(graph.circular_import_error(&path).into());
          }
        }
        None => graph.node_mut(existing).is_root = true,
      }
      return Ok(Requested::Node(existing));
    }

    let source = match maybe_fake {
      Some(implementation) => ContentSource::Fake {
        implementation,
        specifier: final_specifier,
      },
      None if final_specifier != resolved => {
        ContentSource::Redirect(final_specifier)
      }
      None => ContentSource::Fetch,
    };
    log::debug!("Creating node for {} ({:?})", resolved, source);
    let id = graph.insert(GraphNode {
      identity,
      source,
      parents: maybe_parent.into_iter().collect(),
      is_root: maybe_parent.is_none(),
      state: NodeState::Spawning,
    });
    // the executor may start building right away
    drop(graph);
    let handle = spawn(self.executor.as_ref(), build_node(self.clone(), id));
    let mut graph = self.graph.borrow_mut();
    let node = graph.node_mut(id);
    if matches!(node.state, NodeState::Spawning) {
      node.state = NodeState::Pending(handle.shared_local());
    }
    Ok(Requested::Node(id))
  }

  async fn build_module(self: &Rc<Self>, id: NodeId) -> ModuleResult {
    let (identity, source, maybe_referrer) = {
      let graph = self.graph.borrow();
      let node = graph.node(id);
      let maybe_referrer = node
        .parents
        .first()
        .map(|parent| graph.node(*parent).content_specifier().clone());
      (node.identity.clone(), node.source.clone(), maybe_referrer)
    };
    let specifier = source.content_specifier(&identity).clone();

    let mut maybe_original = None;
    let (content, maybe_headers) = match &source {
      ContentSource::Fetch | ContentSource::Redirect(_) => {
        let context = FetchContext::Module {
          specifier: specifier.clone(),
          maybe_referrer,
        };
        let fetched = fetch(self.loader.as_ref(), &specifier, context).await?;
        maybe_original = Some(fetched.text.clone());
        (fetched.text, fetched.maybe_headers)
      }
      ContentSource::Fake { implementation, .. } => {
        let content: Arc<str> = match implementation {
          FakeModule::Source(source) => source.clone(),
          FakeModule::Generated(generate) => generate().into(),
          FakeModule::FromOriginal(generate) => {
            let full_content = self.load_original(&specifier).await;
            maybe_original = Some(full_content.clone());
            generate(&OriginalModule {
              specifier: specifier.clone(),
              full_content,
            })
            .into()
          }
        };
        (content, None)
      }
    };

    let locations = self.analyzer.analyze(&content);
    let mut replacements = Vec::with_capacity(locations.len());
    for location in &locations {
      replacements.push(match self.request(&location.specifier, Some(id))? {
        Requested::Real(specifier) => future::ready(Ok(specifier)).boxed_local(),
        Requested::Node(child) => self
          .graph
          .borrow()
          .wait(child)
          .map(|result| result.map(|module| module.locator.clone()))
          .boxed_local(),
      });
    }
    let replacements = future::try_join_all(replacements).await?;
    let content: Arc<str> =
      replace_imports(&content, &locations, &replacements).into();

    let maybe_diff_offsets = match &self.maybe_coverage {
      Some(_) => {
        let original = match maybe_original {
          Some(original) => original,
          None => self.load_original(&specifier).await,
        };
        Some(compute_diff_offsets(&content, &original))
      }
      None => None,
    };

    let (media_type, _) = resolve_media_type_and_charset_from_headers(
      &specifier,
      maybe_headers.as_ref(),
    );
    let content_type = maybe_headers
      .as_ref()
      .and_then(|headers| headers.get("content-type"))
      .cloned()
      .unwrap_or_else(|| content_type_for_media_type(media_type).to_string());
    let artifact = Arc::new(ModuleArtifact {
      identity,
      specifier: specifier.clone(),
      content,
      media_type,
      content_type,
    });
    let locator = self.registry.register(artifact.clone());
    log::debug!("Registered {} as {}", specifier, locator);

    let maybe_coverage =
      maybe_diff_offsets.map(|diff_offsets| CoverageMapEntry {
        replaced_url: locator.clone(),
        original_url: specifier.to_string(),
        diff_offsets,
      });
    if let (Some(coverage), Some(entry)) =
      (&self.maybe_coverage, &maybe_coverage)
    {
      coverage.entry_added(entry, self.executor.as_ref());
    }

    Ok(Arc::new(LoadedModule {
      locator,
      artifact,
      maybe_coverage,
    }))
  }

  /// Loads the content a fake replaces. Failures result in an empty
  /// original.
  async fn load_original(&self, specifier: &ModuleSpecifier) -> Arc<str> {
    let context = FetchContext::Module {
      specifier: specifier.clone(),
      maybe_referrer: None,
    };
    match fetch(self.loader.as_ref(), specifier, context).await {
      Ok(fetched) => fetched.text,
      Err(err) => {
        log::debug!("Unable to load original of {}: {:#}", specifier, err);
        "".into()
      }
    }
  }
}

async fn build_node(inner: Rc<ResolverInner>, id: NodeId) -> ModuleResult {
  let result = inner.build_module(id).await;
  let state = match &result {
    Ok(module) => NodeState::Ready(module.clone()),
    Err(err) => NodeState::Failed(err.clone()),
  };
  inner.graph.borrow_mut().node_mut(id).state = state;
  result
}

/// A successful response decoded to text.
struct FetchedSource {
  specifier: ModuleSpecifier,
  text: Arc<str>,
  maybe_headers: Option<HashMap<String, String>>,
}

fn fetch(
  loader: &dyn Loader,
  specifier: &ModuleSpecifier,
  context: FetchContext,
) -> impl Future<Output = Result<FetchedSource, ImportError>> + 'static {
  let fut = if specifier.scheme() == "data" {
    future::ready(load_data_url(specifier).map_err(LoadError::from))
      .boxed_local()
  } else {
    loader.load(specifier)
  };
  async move {
    let response = match fut.await {
      Ok(response) => response,
      Err(source) => return Err(ImportError::Network { context, source }),
    };
    if !response.is_ok_status() {
      return Err(ImportError::HttpStatus {
        context,
        status: response.status,
      });
    }
    let (_, maybe_charset) = resolve_media_type_and_charset_from_headers(
      &response.specifier,
      response.maybe_headers.as_ref(),
    );
    let text =
      decode_source(&response.specifier, maybe_charset, response.content)
        .map_err(|source| ImportError::Decode {
          context,
          source: Arc::new(source),
        })?;
    Ok(FetchedSource {
      specifier: response.specifier,
      text,
      maybe_headers: response.maybe_headers,
    })
  }
}

fn load_import_map(
  maybe_source: Option<ImportMapSource>,
  base: ModuleSpecifier,
  loader: &dyn Loader,
) -> LocalBoxFuture<'static, Result<Rc<ImportMap>, ImportError>> {
  match maybe_source {
    None => future::ready(Ok(Default::default())).boxed_local(),
    Some(ImportMapSource::Inline(value)) => future::ready(
      ImportMap::parse(&value, &base)
        .map(Rc::new)
        .map_err(ImportError::from),
    )
    .boxed_local(),
    Some(ImportMapSource::Url(url)) => {
      let specifier = match resolve_import(&url, &base) {
        Ok(specifier) => specifier,
        Err(err) => return future::ready(Err(err.into())).boxed_local(),
      };
      log::debug!("Loading import map from {}", specifier);
      let context = FetchContext::ImportMap {
        specifier: specifier.clone(),
      };
      let fut = fetch(loader, &specifier, context);
      async move {
        let fetched = fut.await?;
        let import_map =
          ImportMap::parse_from_json(&fetched.text, &fetched.specifier)?;
        Ok(Rc::new(import_map))
      }
      .boxed_local()
    }
  }
}
