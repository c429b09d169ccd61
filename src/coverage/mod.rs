// Copyright 2018-2024 the Deno authors. MIT license.

use std::cell::Cell;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use deno_error::JsError;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use sha2::Digest;
use sha2::Sha256;
use sys_traits::FsCreateDirAll;
use sys_traits::FsWrite;
use thiserror::Error;

use crate::rt::spawn;
use crate::rt::Executor;
use crate::rt::JoinHandle;

pub mod diff;

use diff::DiffKind;

/// Ordered `(offset, shift)` pairs. An offset in the replaced text maps to
/// `offset + shift` in the original text, a `None` shift marks text that
/// does not exist in the original.
pub type DiffOffsets = Vec<(usize, Option<i64>)>;

/// All entries of a session keyed by the replaced url.
pub type CoverageMap = BTreeMap<String, CoverageMapEntry>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageMapEntry {
  /// The url the module was executed from.
  pub replaced_url: String,
  /// The url of the module as it was requested.
  pub original_url: String,
  pub diff_offsets: DiffOffsets,
}

#[derive(Debug, Clone, Error, JsError)]
#[class(generic)]
#[error("Coverage map generation is not enabled. Make sure to create your Importer with generateCoverageMap set to true.")]
pub struct CoverageDisabledError;

/// Computes the offsets that map positions in `from` to positions in `to`.
///
/// Offsets count utf-16 code units, which is what coverage tools report.
pub fn compute_diff_offsets(from: &str, to: &str) -> DiffOffsets {
  let from_units = from.encode_utf16().collect::<Vec<_>>();
  let to_units = to.encode_utf16().collect::<Vec<_>>();
  let mut offsets = Vec::new();
  let mut cursor = 0;
  let mut shift = 0i64;
  for part in diff::diff(&from_units, &to_units) {
    match part.kind {
      DiffKind::Added => {
        shift += part.len as i64;
        continue;
      }
      DiffKind::Removed => {
        offsets.push((cursor, None));
        shift -= part.len as i64;
      }
      DiffKind::Equal => offsets.push((cursor, Some(shift))),
    }
    cursor += part.len;
  }
  offsets
}

/// Maps an offset in the replaced text back to the original text.
///
/// Offsets inside removed ranges snap to the closest mappable position.
pub fn map_index(index: usize, diff_offsets: &[(usize, Option<i64>)]) -> usize {
  let mut new_index = index as i64;
  let mut found = None;
  let mut prev = None;
  let mut last_non_null = None;
  let mut one_after_last_non_null = None;
  let mut stop_on_next_non_null = false;

  for (i, (start, shift)) in diff_offsets.iter().enumerate() {
    if index < *start {
      if let Some(last) = last_non_null {
        found = Some(last);
        if Some(last) != prev {
          let (snap_to, _) =
            diff_offsets[one_after_last_non_null.unwrap_or(last)];
          new_index = snap_to as i64;
        }
        break;
      }
      stop_on_next_non_null = true;
    }
    if stop_on_next_non_null && shift.is_some() {
      found = Some(i);
      new_index = *start as i64;
      break;
    }
    if shift.is_some() {
      last_non_null = Some(i);
      one_after_last_non_null =
        (i + 1 < diff_offsets.len()).then_some(i + 1);
    }
    prev = Some(i);
  }

  if found.is_none() {
    found = last_non_null;
    if let (Some((_, None)), Some(after)) =
      (diff_offsets.last(), one_after_last_non_null)
    {
      new_index = diff_offsets[after].0 as i64;
    }
  }

  match found.and_then(|i| diff_offsets[i].1) {
    Some(shift) => (new_index + shift).max(0) as usize,
    None => 0,
  }
}

/// Rewrites a script coverage object (as reported by V8) that was collected
/// for a replaced module so it refers to the original module.
///
/// Returns `false` when the script is not part of the coverage map.
pub fn apply_coverage(script_coverage: &mut Value, map: &CoverageMap) -> bool {
  let Some(url) = script_coverage.get("url").and_then(|url| url.as_str())
  else {
    return false;
  };
  let Some(entry) = map.get(url) else {
    return false;
  };

  script_coverage["url"] = Value::String(entry.original_url.clone());
  let Some(functions) = script_coverage
    .get_mut("functions")
    .and_then(|functions| functions.as_array_mut())
  else {
    return true;
  };
  for function in functions {
    let Some(ranges) = function
      .get_mut("ranges")
      .and_then(|ranges| ranges.as_array_mut())
    else {
      continue;
    };
    for range in ranges {
      for key in ["startOffset", "endOffset"] {
        if let Some(offset) = range.get(key).and_then(|v| v.as_u64()) {
          let mapped = map_index(offset as usize, &entry.diff_offsets);
          range[key] = Value::from(mapped as u64);
        }
      }
    }
  }
  true
}

/// Persists coverage map entries.
#[async_trait(?Send)]
pub trait CoverageWriter {
  async fn write_entry(&self, entry: &CoverageMapEntry)
    -> std::io::Result<()>;
}

/// Writes each entry as a json file to a directory.
#[derive(Debug, Clone)]
pub struct SysCoverageWriter<TSys: FsCreateDirAll + FsWrite> {
  sys: TSys,
  out_dir: PathBuf,
}

impl<TSys: FsCreateDirAll + FsWrite> SysCoverageWriter<TSys> {
  pub fn new(sys: TSys, out_dir: PathBuf) -> Self {
    Self { sys, out_dir }
  }

  /// The file an entry for the replaced url is written to.
  pub fn entry_path(&self, replaced_url: &str) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(replaced_url.as_bytes());
    self
      .out_dir
      .join(format!("{:x}.json", hasher.finalize()))
  }
}

#[async_trait(?Send)]
impl<TSys: FsCreateDirAll + FsWrite> CoverageWriter for SysCoverageWriter<TSys> {
  async fn write_entry(
    &self,
    entry: &CoverageMapEntry,
  ) -> std::io::Result<()> {
    let json = serde_json::to_string(entry)?;
    self.sys.fs_create_dir_all(&self.out_dir)?;
    self.sys.fs_write(self.entry_path(&entry.replaced_url), json)
  }
}

#[derive(Default, Clone)]
pub struct CoverageOptions {
  /// Where entries are persisted. Entries are only kept in memory when
  /// this is `None`.
  pub writer: Option<Rc<dyn CoverageWriter>>,
  /// Artificial delay before each entry is written.
  pub write_delay: Option<Duration>,
}

pub type CoverageMapEntryListener = Rc<dyn Fn(&CoverageMapEntry)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoverageListenerId(usize);

/// Coverage bookkeeping of an import session.
pub(crate) struct CoverageState {
  options: CoverageOptions,
  listeners: RefCell<Vec<(CoverageListenerId, CoverageMapEntryListener)>>,
  next_listener_id: Cell<usize>,
  pending_writes: RefCell<Vec<JoinHandle<()>>>,
}

impl CoverageState {
  pub fn new(options: CoverageOptions) -> Self {
    Self {
      options,
      listeners: Default::default(),
      next_listener_id: Cell::new(0),
      pending_writes: Default::default(),
    }
  }

  pub fn add_listener(
    &self,
    listener: CoverageMapEntryListener,
  ) -> CoverageListenerId {
    let id = CoverageListenerId(self.next_listener_id.get());
    self.next_listener_id.set(id.0 + 1);
    self.listeners.borrow_mut().push((id, listener));
    id
  }

  pub fn remove_listener(&self, id: CoverageListenerId) -> bool {
    let mut listeners = self.listeners.borrow_mut();
    let len = listeners.len();
    listeners.retain(|(listener_id, _)| *listener_id != id);
    listeners.len() != len
  }

  /// Notifies listeners and starts persisting the entry.
  pub fn entry_added(&self, entry: &CoverageMapEntry, executor: &dyn Executor) {
    let listeners = self
      .listeners
      .borrow()
      .iter()
      .map(|(_, listener)| listener.clone())
      .collect::<Vec<_>>();
    for listener in listeners {
      listener(entry);
    }

    let Some(writer) = self.options.writer.clone() else {
      return;
    };
    let entry = entry.clone();
    let maybe_delay = self.options.write_delay;
    let handle = spawn(executor, async move {
      if let Some(delay) = maybe_delay {
        sleep(delay).await;
      }
      if let Err(err) = writer.write_entry(&entry).await {
        log::warn!(
          "Failed writing coverage map entry for {}: {:#}",
          entry.original_url,
          err
        );
      }
    });
    self.pending_writes.borrow_mut().push(handle);
  }

  /// Resolves once every write started so far, including ones started
  /// while waiting, has finished.
  pub async fn finish_writes(&self) {
    loop {
      let pending = std::mem::take(&mut *self.pending_writes.borrow_mut());
      if pending.is_empty() {
        break;
      }
      futures::future::join_all(pending).await;
    }
  }
}

#[cfg(not(target_arch = "wasm32"))]
async fn sleep(duration: Duration) {
  tokio::time::sleep(duration).await;
}

#[cfg(target_arch = "wasm32")]
async fn sleep(_duration: Duration) {}
