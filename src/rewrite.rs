// Copyright 2018-2024 the Deno authors. MIT license.

use crate::analyzer::ImportLocation;

/// Replaces each import specifier in the source with the replacement at the
/// same index.
///
/// The locations must be sorted and not overlap, which is what
/// [`crate::ModuleAnalyzer::analyze`] returns.
pub fn replace_imports(
  source: &str,
  locations: &[ImportLocation],
  replacements: &[String],
) -> String {
  debug_assert_eq!(locations.len(), replacements.len());
  if locations.is_empty() {
    return source.to_string();
  }
  let capacity = source.len()
    + replacements.iter().map(|r| r.len()).sum::<usize>()
    - locations.iter().map(|l| l.length).sum::<usize>().min(source.len());
  let mut text = String::with_capacity(capacity);
  let mut last_end = 0;
  for (location, replacement) in locations.iter().zip(replacements) {
    text.push_str(&source[last_end..location.start]);
    text.push_str(replacement);
    last_end = location.end();
  }
  text.push_str(&source[last_end..]);
  text
}
