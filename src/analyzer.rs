// Copyright 2018-2024 the Deno authors. MIT license.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde::Serialize;

/// Matches `import ... "x"` statements, including side effect imports.
static STATIC_IMPORT_RE: Lazy<Regex> = Lazy::new(|| {
  Regex::new(
    r#"(?m)(?:^|;)\s*(?P<keyword>import)\b[^;"'`]*?["'](?P<specifier>[^"'\n]+)["']"#,
  )
  .unwrap()
});

/// Matches `import("x")` expressions with a string literal argument.
static DYNAMIC_IMPORT_RE: Lazy<Regex> = Lazy::new(|| {
  Regex::new(
    r#"\b(?P<keyword>import)\s*\(\s*["'](?P<specifier>[^"'\n]+)["']\s*\)"#,
  )
  .unwrap()
});

/// Matches `export ... from "x"` re-exports.
static EXPORT_FROM_RE: Lazy<Regex> = Lazy::new(|| {
  Regex::new(
    r#"(?m)(?:^|;)\s*(?P<keyword>export)\b(?P<clause>[^;]*?)\bfrom\s*["'](?P<specifier>[^"'\n]+)["']"#,
  )
  .unwrap()
});

static BLOCK_COMMENT_RE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());

/// The location of an import specifier in a module's source.
///
/// Offsets are byte offsets into the source and only cover the text
/// between the quotes.
#[derive(
  Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ImportLocation {
  pub start: usize,
  pub length: usize,
  pub specifier: String,
}

impl ImportLocation {
  pub fn end(&self) -> usize {
    self.start + self.length
  }
}

/// A range of source text that is a comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentRange {
  pub start: usize,
  pub end: usize,
}

impl CommentRange {
  fn overlaps(&self, start: usize, end: usize) -> bool {
    self.start < end && start < self.end
  }
}

/// Analyzes the provided module source for the specifiers it imports.
pub trait ModuleAnalyzer {
  /// Returns every import, re-export and dynamic import specifier ordered
  /// by position. This never fails, text that does not look like an import
  /// is ignored.
  fn analyze(&self, source: &str) -> Vec<ImportLocation>;
}

/// Pattern based analyzer which doesn't require parsing the module.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultModuleAnalyzer;

impl ModuleAnalyzer for DefaultModuleAnalyzer {
  fn analyze(&self, source: &str) -> Vec<ImportLocation> {
    analyze_imports(source)
  }
}

/// Finds the location of all import specifiers in the source.
pub fn analyze_imports(source: &str) -> Vec<ImportLocation> {
  let comments = find_comments(source);
  let in_comment = |start: usize, end: usize| {
    comments.iter().any(|comment| comment.overlaps(start, end))
  };
  let mut locations = BTreeSet::new();

  for captures in STATIC_IMPORT_RE.captures_iter(source) {
    let (Some(keyword), Some(specifier)) =
      (captures.name("keyword"), captures.name("specifier"))
    else {
      continue;
    };
    // import.meta
    if source[keyword.end()..].trim_start().starts_with('.') {
      continue;
    }
    if !in_comment(keyword.start(), specifier.end()) {
      locations.insert(ImportLocation {
        start: specifier.start(),
        length: specifier.len(),
        specifier: specifier.as_str().to_string(),
      });
    }
  }

  for captures in DYNAMIC_IMPORT_RE.captures_iter(source) {
    let (Some(keyword), Some(specifier)) =
      (captures.name("keyword"), captures.name("specifier"))
    else {
      continue;
    };
    if !in_comment(keyword.start(), specifier.end()) {
      locations.insert(ImportLocation {
        start: specifier.start(),
        length: specifier.len(),
        specifier: specifier.as_str().to_string(),
      });
    }
  }

  for captures in EXPORT_FROM_RE.captures_iter(source) {
    let (Some(keyword), Some(clause), Some(specifier)) = (
      captures.name("keyword"),
      captures.name("clause"),
      captures.name("specifier"),
    ) else {
      continue;
    };
    if is_export_clause(clause.as_str())
      && !in_comment(keyword.start(), specifier.end())
    {
      locations.insert(ImportLocation {
        start: specifier.start(),
        length: specifier.len(),
        specifier: specifier.as_str().to_string(),
      });
    }
  }

  locations.into_iter().collect()
}

/// Whether the text between `export` and `from` looks like an export
/// clause (`* as ns`, `{ a, b as c }`) rather than a declaration that
/// happens to contain the word `from`.
fn is_export_clause(clause: &str) -> bool {
  let clause = clause.trim();
  let clause = match clause.strip_prefix("type") {
    Some(rest) if rest.starts_with(|c: char| c.is_whitespace() || c == '{') => {
      rest.trim_start()
    }
    _ => clause,
  };

  if let Some(rest) = clause.strip_prefix('*') {
    let rest = rest.trim();
    if rest.is_empty() {
      return true;
    }
    let Some(name) = rest.strip_prefix("as") else {
      return false;
    };
    let name = name.trim();
    return !name.is_empty()
      && name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '$');
  }

  if !clause.starts_with('{') || !clause.ends_with('}') {
    return false;
  }
  let mut depth = 0usize;
  for c in clause.chars() {
    match c {
      '{' => depth += 1,
      '}' => {
        if depth == 0 {
          return false;
        }
        depth -= 1;
      }
      '"' | '\'' | '`' | '(' | ')' | '=' | ';' => return false,
      _ => {}
    }
  }
  depth == 0
}

/// Finds line and block comments in the source.
///
/// Line comments are detected per line while skipping `//` inside string
/// literals on that line. Overlapping ranges are merged.
pub fn find_comments(source: &str) -> Vec<CommentRange> {
  let mut comments = Vec::new();
  let mut line_start = 0;
  for line in source.split('\n') {
    if let Some(index) = find_line_comment_start(line) {
      comments.push(CommentRange {
        start: line_start + index,
        end: line_start + line.len(),
      });
    }
    line_start += line.len() + 1;
  }

  for m in BLOCK_COMMENT_RE.find_iter(source) {
    comments.push(CommentRange {
      start: m.start(),
      end: m.end(),
    });
  }

  comments.sort_by_key(|comment| comment.start);

  let mut merged: Vec<CommentRange> = Vec::with_capacity(comments.len());
  for comment in comments {
    match merged.last_mut() {
      Some(last) if comment.start < last.end => {
        last.end = last.end.max(comment.end);
      }
      _ => merged.push(comment),
    }
  }
  merged
}

fn find_line_comment_start(line: &str) -> Option<usize> {
  let bytes = line.as_bytes();
  let mut maybe_quote: Option<u8> = None;
  let mut i = 0;
  while i < bytes.len() {
    let byte = bytes[i];
    match maybe_quote {
      Some(quote) => {
        if byte == b'\\' {
          i += 1;
        } else if byte == quote {
          maybe_quote = None;
        }
      }
      None => match byte {
        b'"' | b'\'' | b'`' => maybe_quote = Some(byte),
        b'/' if bytes.get(i + 1) == Some(&b'/') => return Some(i),
        _ => {}
      },
    }
    i += 1;
  }
  None
}
