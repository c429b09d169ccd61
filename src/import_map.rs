// Copyright 2018-2024 the Deno authors. MIT license.

//! A subset of the import maps standard (https://wicg.github.io/import-maps/)
//! supporting the top level `"imports"` key.

use std::sync::Arc;

use deno_error::JsError;
use indexmap::IndexMap;
use serde_json::Value;
use thiserror::Error;

use crate::module_specifier::is_special_scheme;
use crate::module_specifier::ModuleSpecifier;

#[derive(Debug, Clone, Error, JsError)]
pub enum ImportMapError {
  #[class(type)]
  #[error("The top-level value needs to be a JSON object.")]
  TopLevelNotObject,
  #[class(type)]
  #[error("The \"imports\" top-level key needs to be a JSON object.")]
  ImportsNotObject,
  #[class(type)]
  #[error("Unable to parse import map JSON: {0}")]
  Json(Arc<serde_json::Error>),
}

#[derive(Debug, Clone, Error, JsError, PartialEq, Eq)]
#[class(type)]
pub enum ImportMapResolveError {
  #[error("Relative import path \"{0}\" not prefixed with / or ./ or ../")]
  BareSpecifierUnresolved(String),
  #[error("Resolution of {0} was blocked by a null entry.")]
  BlockedByNullEntry(String),
  #[error("Resolution of {0} was blocked since the afterPrefix portion could not be URL-parsed relative to the resolutionResult mapped to by the specifierKey prefix.")]
  InvalidAfterPrefix(String),
  #[error("Resolution of {0} was blocked due to it backtracking above its prefix specifierKey.")]
  BacktracksAbovePrefix(String),
}

/// A parsed import map.
///
/// An entry with a `None` address blocks resolution of its key, which is
/// different from the key not being present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportMap {
  imports: IndexMap<String, Option<ModuleSpecifier>>,
  specifier_keys: Vec<String>,
}

impl ImportMap {
  pub fn parse_from_json(
    text: &str,
    base_url: &ModuleSpecifier,
  ) -> Result<Self, ImportMapError> {
    let value: Value = serde_json::from_str(text)
      .map_err(|err| ImportMapError::Json(Arc::new(err)))?;
    Self::parse(&value, base_url)
  }

  /// Parses and normalizes an import map.
  ///
  /// Malformed entries are reported as warnings and turned into blocking
  /// entries rather than failing the whole map.
  pub fn parse(
    value: &Value,
    base_url: &ModuleSpecifier,
  ) -> Result<Self, ImportMapError> {
    let Value::Object(map) = value else {
      return Err(ImportMapError::TopLevelNotObject);
    };

    for key in map.keys() {
      if key != "imports" {
        log::warn!(
          "An invalid top-level key was present in the import map: {}",
          key
        );
      }
    }

    let mut import_map = ImportMap::default();
    match map.get("imports") {
      None | Some(Value::Null) => {}
      Some(Value::Object(imports)) => {
        import_map.specifier_keys = imports.keys().cloned().collect();
        import_map.imports = sort_and_normalize_specifier_map(imports, base_url);
      }
      Some(_) => return Err(ImportMapError::ImportsNotObject),
    }
    Ok(import_map)
  }

  /// The normalized entries, sorted so that longer keys come before the
  /// keys they are prefixed by.
  pub fn imports(
    &self,
  ) -> impl Iterator<Item = (&str, Option<&ModuleSpecifier>)> {
    self
      .imports
      .iter()
      .map(|(key, value)| (key.as_str(), value.as_ref()))
  }

  /// The keys as they were written in the import map.
  pub fn specifier_keys(&self) -> &[String] {
    &self.specifier_keys
  }

  pub fn is_empty(&self) -> bool {
    self.imports.is_empty()
  }

  /// Resolves a specifier imported by `referrer`.
  ///
  /// Precedence is an exact key, then prefix keys, then the specifier as a
  /// url, then failure for bare specifiers.
  pub fn resolve(
    &self,
    specifier: &str,
    referrer: &ModuleSpecifier,
  ) -> Result<ModuleSpecifier, ImportMapResolveError> {
    let maybe_url = parse_url_like_import_specifier(specifier, referrer);
    let normalized = match &maybe_url {
      Some(url) => url.as_str(),
      None => specifier,
    };

    if let Some(resolved) =
      self.resolve_imports_match(normalized, maybe_url.as_ref())?
    {
      return Ok(resolved);
    }

    maybe_url.ok_or_else(|| {
      ImportMapResolveError::BareSpecifierUnresolved(specifier.to_string())
    })
  }

  fn resolve_imports_match(
    &self,
    normalized: &str,
    maybe_url: Option<&ModuleSpecifier>,
  ) -> Result<Option<ModuleSpecifier>, ImportMapResolveError> {
    if let Some(value) = self.imports.get(normalized) {
      return match value {
        Some(address) => Ok(Some(address.clone())),
        None => Err(ImportMapResolveError::BlockedByNullEntry(
          normalized.to_string(),
        )),
      };
    }

    let can_prefix_match =
      maybe_url.map_or(true, |url| is_special_scheme(url.scheme()));
    if !can_prefix_match {
      return Ok(None);
    }

    for (key, value) in &self.imports {
      if !key.ends_with('/') || !normalized.starts_with(key.as_str()) {
        continue;
      }
      let Some(address) = value else {
        return Err(ImportMapResolveError::BlockedByNullEntry(key.clone()));
      };
      let after_prefix = &normalized[key.len()..];
      let Ok(url) = address.join(after_prefix) else {
        return Err(ImportMapResolveError::InvalidAfterPrefix(
          normalized.to_string(),
        ));
      };
      if !url.as_str().starts_with(address.as_str()) {
        return Err(ImportMapResolveError::BacktracksAbovePrefix(
          normalized.to_string(),
        ));
      }
      return Ok(Some(url));
    }
    Ok(None)
  }
}

fn sort_and_normalize_specifier_map(
  map: &serde_json::Map<String, Value>,
  base_url: &ModuleSpecifier,
) -> IndexMap<String, Option<ModuleSpecifier>> {
  let mut normalized = IndexMap::with_capacity(map.len());
  for (specifier_key, value) in map {
    let Some(normalized_key) = normalize_specifier_key(specifier_key, base_url)
    else {
      continue;
    };

    let Value::String(address) = value else {
      log::warn!(
        "Addresses need to be strings but {} is not of type string.",
        specifier_key
      );
      normalized.insert(normalized_key, None);
      continue;
    };

    let Some(address_url) = parse_url_like_import_specifier(address, base_url)
    else {
      log::warn!("The address {} is invalid.", address);
      normalized.insert(normalized_key, None);
      continue;
    };

    if specifier_key.ends_with('/') && !address_url.as_str().ends_with('/') {
      log::warn!(
        "An invalid address was given for {}; since the specifier ended in a slash, the address needs to as well.",
        specifier_key
      );
      normalized.insert(normalized_key, None);
      continue;
    }

    normalized.insert(normalized_key, Some(address_url));
  }

  normalized.sort_by(|a, _, b, _| b.cmp(a));
  normalized
}

fn normalize_specifier_key(
  specifier_key: &str,
  base_url: &ModuleSpecifier,
) -> Option<String> {
  if specifier_key.is_empty() {
    log::warn!("Specifier keys cannot be an empty string.");
    return None;
  }
  match parse_url_like_import_specifier(specifier_key, base_url) {
    Some(url) => Some(url.to_string()),
    None => Some(specifier_key.to_string()),
  }
}

/// Parses specifiers starting with `/`, `./` or `../` relative to the base
/// and everything else as an absolute url.
pub fn parse_url_like_import_specifier(
  specifier: &str,
  base_url: &ModuleSpecifier,
) -> Option<ModuleSpecifier> {
  if specifier.starts_with('/')
    || specifier.starts_with("./")
    || specifier.starts_with("../")
  {
    return base_url.join(specifier).ok();
  }
  ModuleSpecifier::parse(specifier).ok()
}
