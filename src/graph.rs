// Copyright 2018-2024 the Deno authors. MIT license.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use deno_error::JsError;
use deno_media_type::MediaType;
use deno_unsync::future::SharedLocal;
use futures::future;
use futures::future::LocalBoxFuture;
use futures::FutureExt;
use indexmap::IndexSet;
use thiserror::Error;

use crate::collections::SeenPendingCollection;
use crate::coverage::CoverageMapEntry;
use crate::import_map::ImportMapError;
use crate::import_map::ImportMapResolveError;
use crate::module_specifier::short_name;
use crate::module_specifier::ModuleSpecifier;
use crate::module_specifier::SpecifierError;
use crate::rt::JoinHandle;
use crate::source::LoadError;

/// The key of a node in the graph.
///
/// The same url is a different module when it is loaded with fakes
/// disabled (a fake importing the module it replaces) or when it was forced
/// to be real.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedIdentity {
  pub specifier: ModuleSpecifier,
  pub allow_fakes: bool,
  /// The url was marked as real and no fake replaces it.
  ///
  /// Only ever set together with `allow_fakes == false`. With fakes allowed
  /// such an import is left as the url and never becomes a node.
  pub forced_real: bool,
}

/// What a fake implementation receives when it asks for the module it is
/// replacing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginalModule {
  pub specifier: ModuleSpecifier,
  /// The source of the original module, or an empty string if it could not
  /// be loaded.
  pub full_content: Arc<str>,
}

/// The implementation of a faked module.
#[derive(Clone)]
pub enum FakeModule {
  Source(Arc<str>),
  /// Produces the source without looking at the original module, which is
  /// then never loaded.
  Generated(Rc<dyn Fn() -> String>),
  FromOriginal(Rc<dyn Fn(&OriginalModule) -> String>),
}

impl FakeModule {
  pub fn generated(f: impl Fn() -> String + 'static) -> Self {
    Self::Generated(Rc::new(f))
  }

  pub fn from_original(f: impl Fn(&OriginalModule) -> String + 'static) -> Self {
    Self::FromOriginal(Rc::new(f))
  }
}

impl From<&str> for FakeModule {
  fn from(source: &str) -> Self {
    Self::Source(source.into())
  }
}

impl From<String> for FakeModule {
  fn from(source: String) -> Self {
    Self::Source(source.into())
  }
}

impl fmt::Debug for FakeModule {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Source(source) => f.debug_tuple("Source").field(source).finish(),
      Self::Generated(_) => f.write_str("Generated"),
      Self::FromOriginal(_) => f.write_str("FromOriginal"),
    }
  }
}

/// Where the content of a node comes from.
#[derive(Debug, Clone)]
pub enum ContentSource {
  /// The identity's url is loaded.
  Fetch,
  /// A redirect target is loaded in place of the identity's url.
  Redirect(ModuleSpecifier),
  /// The fake registered for `specifier`, which differs from the identity's
  /// url when the fake was reached through a redirect.
  Fake {
    implementation: FakeModule,
    specifier: ModuleSpecifier,
  },
}

impl ContentSource {
  /// The url the content belongs to. Relative imports in the content are
  /// resolved against it.
  pub fn content_specifier<'a>(
    &'a self,
    identity: &'a ResolvedIdentity,
  ) -> &'a ModuleSpecifier {
    match self {
      ContentSource::Fetch => &identity.specifier,
      ContentSource::Redirect(specifier) => specifier,
      ContentSource::Fake { specifier, .. } => specifier,
    }
  }
}

/// Rewritten content ready to be handed to the execution host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleArtifact {
  pub identity: ResolvedIdentity,
  /// The url the content belongs to.
  pub specifier: ModuleSpecifier,
  pub content: Arc<str>,
  pub media_type: MediaType,
  pub content_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedModule {
  /// The specifier the execution host loads the artifact with. Importers of
  /// this module have their specifier replaced by it.
  pub locator: String,
  pub artifact: Arc<ModuleArtifact>,
  pub maybe_coverage: Option<CoverageMapEntry>,
}

pub type ModuleResult = Result<Arc<LoadedModule>, ImportError>;

/// What was being loaded when a fetch failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchContext {
  Module {
    specifier: ModuleSpecifier,
    maybe_referrer: Option<ModuleSpecifier>,
  },
  ImportMap {
    specifier: ModuleSpecifier,
  },
}

impl fmt::Display for FetchContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FetchContext::Module {
        specifier,
        maybe_referrer: Some(referrer),
      } => write!(f, "Failed to import \"{}\" from \"{}\".", specifier, referrer),
      FetchContext::Module {
        specifier,
        maybe_referrer: None,
      } => write!(f, "Failed to import \"{}\".", specifier),
      FetchContext::ImportMap { specifier } => {
        write!(f, "Failed install import map from \"{}\".", specifier)
      }
    }
  }
}

#[derive(Debug, Clone, Error, JsError)]
pub enum ImportError {
  #[class(type)]
  #[error("{context} A network error occurred while fetching the module.")]
  Network {
    context: FetchContext,
    #[source]
    source: LoadError,
  },
  #[class(type)]
  #[error("{context} The resource did not respond with an ok status code ({status}).")]
  HttpStatus { context: FetchContext, status: u16 },
  #[class(type)]
  #[error("{context} The module could not be decoded: {source}")]
  Decode {
    context: FetchContext,
    #[source]
    source: Arc<std::io::Error>,
  },
  #[class(inherit)]
  #[error(transparent)]
  Resolution(#[from] ImportMapResolveError),
  #[class(inherit)]
  #[error(transparent)]
  ImportMap(#[from] ImportMapError),
  #[class(inherit)]
  #[error(transparent)]
  InvalidSpecifier(#[from] SpecifierError),
  #[class(generic)]
  #[error("Circular imports are not supported. \"{0}\" imports itself.")]
  SelfImport(ModuleSpecifier),
  #[class(inherit)]
  #[error(transparent)]
  CircularImport(#[from] CircularImportError),
  #[class(generic)]
  #[error("Circular redirects detected.\n{}", fmt_redirects(.0))]
  CircularRedirect(Vec<ModuleSpecifier>),
}

/// An import chain that leads back to a module that is still being built.
///
/// The path starts and ends with the same module.
#[derive(Debug, Clone, PartialEq, Eq, Error, JsError)]
#[class(generic)]
#[error("{}", fmt_circular_import(.path))]
pub struct CircularImportError {
  pub path: Vec<ModuleSpecifier>,
}

fn fmt_circular_import(path: &[ModuleSpecifier]) -> String {
  let chain = path
    .iter()
    .map(short_name)
    .collect::<Vec<_>>()
    .join(" -> ");
  let modules = path.iter().collect::<IndexSet<_>>();
  let mut text = format!("Circular imports are not supported:\n{}\n", chain);
  text.push_str(
    "Consider marking one of the following modules as real to break the cycle:",
  );
  for specifier in modules {
    text.push_str("\n  ");
    text.push_str(specifier.as_str());
  }
  text
}

fn fmt_redirects(chain: &[ModuleSpecifier]) -> String {
  chain
    .iter()
    .map(|specifier| format!("\"{}\"", specifier))
    .collect::<Vec<_>>()
    .join(" -> ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct NodeId(usize);

pub(crate) enum NodeState {
  /// Inserted, but the build is still being handed to the executor.
  Spawning,
  Pending(SharedLocal<JoinHandle<ModuleResult>>),
  Ready(Arc<LoadedModule>),
  Failed(ImportError),
}

pub(crate) struct GraphNode {
  pub identity: ResolvedIdentity,
  pub source: ContentSource,
  /// Nodes that import this node. May contain cycles.
  pub parents: IndexSet<NodeId>,
  /// Whether the node was requested as an entry point at least once.
  pub is_root: bool,
  pub state: NodeState,
}

impl GraphNode {
  pub fn content_specifier(&self) -> &ModuleSpecifier {
    self.source.content_specifier(&self.identity)
  }

  pub fn maybe_module(&self) -> Option<&Arc<LoadedModule>> {
    match &self.state {
      NodeState::Ready(module) => Some(module),
      NodeState::Spawning | NodeState::Pending(_) | NodeState::Failed(_) => {
        None
      }
    }
  }
}

/// Arena of every module requested in an import session.
#[derive(Default)]
pub(crate) struct ModuleGraph {
  nodes: Vec<GraphNode>,
  ids: HashMap<ResolvedIdentity, NodeId>,
}

impl ModuleGraph {
  pub fn get(&self, identity: &ResolvedIdentity) -> Option<NodeId> {
    self.ids.get(identity).copied()
  }

  /// The id the next inserted node receives.
  pub fn next_id(&self) -> NodeId {
    NodeId(self.nodes.len())
  }

  pub fn insert(&mut self, node: GraphNode) -> NodeId {
    debug_assert!(!self.ids.contains_key(&node.identity));
    let id = self.next_id();
    self.ids.insert(node.identity.clone(), id);
    self.nodes.push(node);
    id
  }

  pub fn node(&self, id: NodeId) -> &GraphNode {
    &self.nodes[id.0]
  }

  pub fn node_mut(&mut self, id: NodeId) -> &mut GraphNode {
    &mut self.nodes[id.0]
  }

  pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
    self.nodes.iter()
  }

  pub fn add_parent(&mut self, id: NodeId, parent: NodeId) {
    self.nodes[id.0].parents.insert(parent);
  }

  /// A future resolving once the node is built. Nodes that already finished
  /// resolve immediately.
  pub fn wait(&self, id: NodeId) -> LocalBoxFuture<'static, ModuleResult> {
    match &self.node(id).state {
      // only code running inside the node's own build can see this state,
      // and it reaches the node as an importer which fails the cycle check
      NodeState::Spawning => unreachable!("waited on a node being spawned"),
      NodeState::Pending(shared) => shared.clone().boxed_local(),
      NodeState::Ready(module) => future::ready(Ok(module.clone())).boxed_local(),
      NodeState::Failed(err) => future::ready(Err(err.clone())).boxed_local(),
    }
  }

  /// Searches the importers of `from` for `target`, returning the shortest
  /// import chain from `target` down to `from` when `target` imports `from`
  /// directly or indirectly.
  pub fn find_closest_circular_import_path(
    &self,
    from: NodeId,
    target: NodeId,
  ) -> Option<Vec<NodeId>> {
    let mut pending = SeenPendingCollection::with_capacity(self.nodes.len());
    pending.add(from, None);
    while let Some(id) = pending.next_pending() {
      for parent in &self.node(id).parents {
        if *parent == target {
          pending.add(target, Some(&id));
          return Some(pending.path_to(&target));
        }
        pending.add(*parent, Some(&id));
      }
    }
    None
  }

  /// The error for `target` being imported by `importer` when `path` leads
  /// from `target` to `importer`.
  pub fn circular_import_error(&self, path: &[NodeId]) -> CircularImportError {
    let mut path = path
      .iter()
      .map(|id| self.node(*id).content_specifier().clone())
      .collect::<Vec<_>>();
    if let Some(first) = path.first().cloned() {
      path.push(first);
    }
    CircularImportError { path }
  }
}
