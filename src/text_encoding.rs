// Copyright 2018-2024 the Deno authors. MIT license.

use std::sync::Arc;

use deno_media_type::encoding::decode_arc_source;
use deno_media_type::encoding::detect_charset;

use crate::module_specifier::ModuleSpecifier;

pub const BOM_CHAR: char = '\u{FEFF}';

/// Strips the byte order mark if it exists from the provided text.
pub fn strip_bom(text: &str) -> &str {
  if text.starts_with(BOM_CHAR) {
    &text[BOM_CHAR.len_utf8()..]
  } else {
    text
  }
}

/// Decodes loaded bytes using the charset from the response headers.
///
/// Without a charset, local files are sniffed for a utf-16 byte order mark
/// and everything else is read as utf-8. Invalid sequences are replaced and
/// a leading byte order mark is removed. Errors only for unknown charsets.
pub fn decode_source(
  specifier: &ModuleSpecifier,
  maybe_charset: Option<&str>,
  bytes: Arc<[u8]>,
) -> Result<Arc<str>, std::io::Error> {
  let charset =
    maybe_charset.unwrap_or_else(|| detect_charset(specifier, &bytes));
  decode_arc_source(charset, bytes)
}
