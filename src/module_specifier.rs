// Copyright 2018-2024 the Deno authors. MIT license.

use deno_error::JsError;
use thiserror::Error;

pub type ModuleSpecifier = url::Url;

#[derive(Debug, Clone, Error, JsError, PartialEq, Eq)]
#[class(type)]
pub enum SpecifierError {
  #[error("Invalid URL \"{specifier}\": {source}")]
  InvalidUrl {
    specifier: String,
    #[source]
    source: url::ParseError,
  },
}

/// Resolves a specifier against a base, the way a `new URL(specifier, base)`
/// call would. Absolute URLs are returned as is.
pub fn resolve_import(
  specifier: &str,
  base: &ModuleSpecifier,
) -> Result<ModuleSpecifier, SpecifierError> {
  base
    .join(specifier)
    .map_err(|source| SpecifierError::InvalidUrl {
      specifier: specifier.to_string(),
      source,
    })
}

/// The name used for a module when rendering import chains.
///
/// This is the last path segment, or the origin for urls without one
/// (ex. `https://example.com`).
pub fn short_name(specifier: &ModuleSpecifier) -> String {
  let last_segment = specifier
    .path_segments()
    .and_then(|mut segments| segments.next_back())
    .unwrap_or("");
  if !last_segment.is_empty() {
    return last_segment.to_string();
  }
  let origin = specifier.origin();
  if origin.is_tuple() {
    origin.ascii_serialization()
  } else {
    specifier.to_string()
  }
}

/// Schemes for which a prefix match in an import map may produce a
/// hierarchical url.
pub fn is_special_scheme(scheme: &str) -> bool {
  matches!(scheme, "ftp" | "file" | "http" | "https" | "ws" | "wss")
}
