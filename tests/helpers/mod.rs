// Copyright 2018-2024 the Deno authors. MIT license.

use std::collections::BTreeMap;

mod test_builder;

use fake_imports::source::MemoryLoader;
use fake_imports::source::Source;
use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;
pub use test_builder::*;
use url::Url;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecOptions {
  #[serde(default)]
  #[serde(skip_serializing_if = "Option::is_none")]
  pub entry: Option<String>,
  #[serde(default)]
  #[serde(skip_serializing_if = "Option::is_none")]
  pub import_map: Option<serde_json::Value>,
  #[serde(default)]
  #[serde(skip_serializing_if = "Option::is_none")]
  pub import_map_entries_real: Option<bool>,
  /// Fake source by specifier.
  #[serde(default)]
  #[serde(skip_serializing_if = "BTreeMap::is_empty")]
  pub fakes: BTreeMap<String, String>,
  #[serde(default)]
  #[serde(skip_serializing_if = "BTreeMap::is_empty")]
  pub redirects: BTreeMap<String, String>,
  /// Specifiers marked real after resolution.
  #[serde(default)]
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub real: Vec<String>,
  /// Specifiers marked real as written.
  #[serde(default)]
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub real_exact: Vec<String>,
  #[serde(default)]
  #[serde(skip_serializing_if = "is_false")]
  pub coverage: bool,
}

fn is_false(v: &bool) -> bool {
  !v
}

pub struct Spec {
  pub options: Option<SpecOptions>,
  pub files: Vec<SpecFile>,
  pub output_file: SpecFile,
}

impl Spec {
  pub fn emit(&self) -> String {
    let mut text = String::new();
    if let Some(options) = &self.options {
      text.push_str("~~ ");
      text.push_str(&serde_json::to_string(options).unwrap());
      text.push_str(" ~~");
      text.push('\n');
    }
    for file in &self.files {
      text.push_str(&file.emit());
      text.push('\n');
    }
    text.push_str(&self.output_file.emit());
    if !text.ends_with('\n') {
      text.push('\n');
    }
    text
  }

  pub fn add_files_to_loader(&self, loader: &mut MemoryLoader) {
    for file in &self.files {
      let source = match file.headers.get("status") {
        Some(status) => Source::Status(status.parse().unwrap()),
        None => Source::Module {
          specifier: file.url().to_string(),
          maybe_headers: Some(file.headers.clone().into_iter().collect()),
          content: file.text.clone(),
        },
      };
      loader.add_source(file.url(), source);
    }
  }
}

#[derive(Debug)]
pub struct SpecFile {
  pub specifier: String,
  pub text: String,
  pub headers: IndexMap<String, String>,
}

impl SpecFile {
  pub fn emit(&self) -> String {
    let mut text = format!("# {}\n", self.specifier);
    if !self.headers.is_empty() {
      text.push_str(&format!(
        "HEADERS: {}\n",
        serde_json::to_string(&self.headers).unwrap()
      ));
    }
    text.push_str(&self.text);
    text
  }

  pub fn url(&self) -> Url {
    if !self.specifier.starts_with("http") && !self.specifier.starts_with("file")
    {
      Url::parse(&format!("file:///{}", self.specifier)).unwrap()
    } else {
      Url::parse(&self.specifier).unwrap()
    }
  }
}

pub fn parse_spec(text: String) -> Spec {
  let mut files = Vec::new();
  let mut current_file = None;
  let mut options = None;
  for (i, line) in text.split('\n').enumerate() {
    if i == 0 && line.starts_with("~~ ") {
      let line = line.trim_start_matches("~~ ").trim_end_matches(" ~~");
      options = Some(serde_json::from_str(line).unwrap());
      continue;
    }
    if let Some(specifier) = line.strip_prefix("# ") {
      if let Some(file) = current_file.take() {
        files.push(file);
      }
      current_file = Some(SpecFile {
        specifier: specifier.to_string(),
        text: String::new(),
        headers: Default::default(),
      });
    } else if let Some(headers) = line.strip_prefix("HEADERS: ") {
      current_file.as_mut().unwrap().headers =
        serde_json::from_str(headers).unwrap();
    } else {
      let current_file = current_file.as_mut().unwrap();
      if !current_file.text.is_empty() {
        current_file.text.push('\n');
      }
      current_file.text.push_str(line);
    }
  }
  files.push(current_file.unwrap());
  let output_file =
    files.remove(files.iter().position(|f| f.specifier == "output").unwrap());
  Spec {
    options,
    files,
    output_file,
  }
}

pub fn indent(text: &str) -> String {
  text
    .split('\n')
    .map(|l| format!("  {}", l).trim_end().to_string())
    .collect::<Vec<_>>()
    .join("\n")
}
