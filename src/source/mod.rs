// Copyright 2018-2024 the Deno authors. MIT license.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use deno_error::JsError;
use deno_error::JsErrorClass;
use deno_media_type::MediaType;
use futures::future;
use futures::future::LocalBoxFuture;
use thiserror::Error;

use crate::module_specifier::ModuleSpecifier;

pub mod registry;

/// The response that is expected from a loader's `.load()` method.
///
/// The returned specifier is the final specifier. This can differ from the
/// requested specifier (e.g. if a redirect was encountered when loading).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadResponse {
  /// The final specifier of the module.
  pub specifier: ModuleSpecifier,
  /// The status code of the response. Non-fetch loaders report `200`.
  pub status: u16,
  /// The content of the module.
  pub content: Arc<[u8]>,
  /// If the module is a remote module, the headers should be returned as a
  /// hashmap of lower-cased string values.
  pub maybe_headers: Option<HashMap<String, String>>,
}

impl LoadResponse {
  pub fn is_ok_status(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn content_type_header(&self) -> Option<&str> {
    self
      .maybe_headers
      .as_ref()
      .and_then(|h| h.get("content-type"))
      .map(|v| v.as_str())
  }
}

/// A transport level failure while loading a module.
#[derive(Debug, Clone, Error, JsError)]
pub enum LoadError {
  #[class(inherit)]
  #[error(transparent)]
  DataUrl(#[from] DataUrlError),
  #[class(inherit)]
  #[error(transparent)]
  Other(Arc<dyn JsErrorClass>),
}

pub type LoadResult = Result<LoadResponse, LoadError>;
pub type LoadFuture = LocalBoxFuture<'static, LoadResult>;

/// A trait which allows asynchronous loading of source files into the
/// import graph.
///
/// A transport failure is reported as an error, while a response that was
/// received but not successful is reported through [`LoadResponse::status`].
pub trait Loader {
  /// A method that given a specifier that asynchronously returns the
  /// source of the file.
  fn load(&self, specifier: &ModuleSpecifier) -> LoadFuture;
}

#[derive(Debug, Clone, Error, JsError)]
#[class(type)]
#[error("Unable to decode data url \"{specifier}\": {reason}")]
pub struct DataUrlError {
  pub specifier: ModuleSpecifier,
  pub reason: String,
}

/// Decodes a `data:` url into a response without consulting a loader.
pub fn load_data_url(
  specifier: &ModuleSpecifier,
) -> Result<LoadResponse, DataUrlError> {
  let to_error = |reason: String| DataUrlError {
    specifier: specifier.clone(),
    reason,
  };
  let data_url = data_url::DataUrl::process(specifier.as_str())
    .map_err(|err| to_error(format!("{:?}", err)))?;
  let (bytes, _) = data_url
    .decode_to_vec()
    .map_err(|err| to_error(format!("{:?}", err)))?;
  let mime_type = data_url.mime_type().to_string();
  let headers = HashMap::from([("content-type".to_string(), mime_type)]);
  Ok(LoadResponse {
    specifier: specifier.clone(),
    status: 200,
    content: Arc::from(bytes),
    maybe_headers: Some(headers),
  })
}

#[derive(Debug, Clone, Error, JsError)]
#[class("NotFound")]
#[error("Module not found \"{0}\".")]
pub struct NotFoundError(pub ModuleSpecifier);

/// An implementation of the loader attribute where the responses are provided
/// ahead of time. This is useful for testing or for hosts that already hold
/// every source in memory.
#[derive(Default)]
pub struct MemoryLoader {
  sources:
    HashMap<ModuleSpecifier, Result<LoadResponse, Arc<dyn JsErrorClass>>>,
  load_counts: RefCell<HashMap<ModuleSpecifier, usize>>,
}

pub enum Source<S> {
  Module {
    specifier: S,
    maybe_headers: Option<Vec<(S, S)>>,
    content: S,
  },
  /// A response that was received with the provided status code.
  Status(u16),
  Err(Arc<dyn JsErrorClass>),
}

impl<S: AsRef<str>> Source<S> {
  fn into_result(
    self,
    requested: &ModuleSpecifier,
  ) -> Result<LoadResponse, Arc<dyn JsErrorClass>> {
    match self {
      Source::Module {
        specifier,
        maybe_headers,
        content,
      } => Ok(LoadResponse {
        specifier: ModuleSpecifier::parse(specifier.as_ref()).unwrap(),
        status: 200,
        content: Arc::from(content.as_ref().to_string().into_bytes()),
        maybe_headers: maybe_headers.map(|h| {
          h.into_iter()
            .map(|(k, v)| {
              (k.as_ref().to_lowercase(), v.as_ref().to_string())
            })
            .collect()
        }),
      }),
      Source::Status(status) => Ok(LoadResponse {
        specifier: requested.clone(),
        status,
        content: Arc::from(Vec::new()),
        maybe_headers: None,
      }),
      Source::Err(error) => Err(error),
    }
  }
}

pub type MemoryLoaderSources<S> = Vec<(S, Source<S>)>;

impl MemoryLoader {
  pub fn new<S: AsRef<str>>(sources: MemoryLoaderSources<S>) -> Self {
    let mut loader = Self::default();
    for (specifier, source) in sources {
      loader.add_source(specifier, source);
    }
    loader
  }

  pub fn add_source<S: AsRef<str>>(
    &mut self,
    specifier: impl AsRef<str>,
    source: Source<S>,
  ) {
    let specifier = ModuleSpecifier::parse(specifier.as_ref()).unwrap();
    let result = source.into_result(&specifier);
    self.sources.insert(specifier, result);
  }

  pub fn add_source_with_text(
    &mut self,
    specifier: impl AsRef<str>,
    source: impl AsRef<str>,
  ) {
    self.add_source(
      specifier.as_ref(),
      Source::Module {
        specifier: specifier.as_ref().to_string(),
        maybe_headers: None,
        content: source.as_ref().to_string(),
      },
    );
  }

  /// The number of times `load` was called for the specifier.
  pub fn load_count(&self, specifier: &ModuleSpecifier) -> usize {
    self
      .load_counts
      .borrow()
      .get(specifier)
      .copied()
      .unwrap_or(0)
  }
}

impl Loader for MemoryLoader {
  fn load(&self, specifier: &ModuleSpecifier) -> LoadFuture {
    *self
      .load_counts
      .borrow_mut()
      .entry(specifier.clone())
      .or_default() += 1;
    let response = match self.sources.get(specifier) {
      Some(Ok(response)) => Ok(response.clone()),
      Some(Err(err)) => Err(LoadError::Other(err.clone())),
      None if specifier.scheme() == "data" => {
        load_data_url(specifier).map_err(LoadError::from)
      }
      None => Err(LoadError::Other(Arc::new(NotFoundError(
        specifier.clone(),
      )))),
    };
    Box::pin(future::ready(response))
  }
}

/// Resolve a media type and optionally the charset from a module specifier and
/// the value of a content type header.
pub fn resolve_media_type_and_charset_from_headers<'a>(
  specifier: &ModuleSpecifier,
  maybe_headers: Option<&'a HashMap<String, String>>,
) -> (MediaType, Option<&'a str>) {
  deno_media_type::resolve_media_type_and_charset_from_content_type(
    specifier,
    maybe_headers
      .and_then(|h| h.get("content-type"))
      .map(|v| v.as_str()),
  )
}

/// The content type handed to the execution host for a media type.
///
/// Anything that is not recognized executes as JavaScript.
pub fn content_type_for_media_type(media_type: MediaType) -> &'static str {
  match media_type {
    MediaType::TypeScript
    | MediaType::Mts
    | MediaType::Cts
    | MediaType::Dts
    | MediaType::Dmts
    | MediaType::Dcts => "application/typescript",
    MediaType::Tsx => "text/tsx",
    MediaType::Jsx => "text/jsx",
    MediaType::Json => "application/json",
    MediaType::Wasm => "application/wasm",
    _ => "text/javascript",
  }
}
