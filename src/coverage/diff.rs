// Copyright 2018-2024 the Deno authors. MIT license.

//! Character diff over utf-16 code units, using the linear space
//! divide and conquer variant of Myers' O(ND) algorithm.

use std::ops::Index;
use std::ops::IndexMut;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffKind {
  Equal,
  Added,
  Removed,
}

/// A run of code units that were kept, added to the new text or removed
/// from the old text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffPart {
  pub kind: DiffKind,
  pub len: usize,
}

/// Computes the parts needed to turn `old` into `new`.
///
/// Between two equal parts, removals always come before additions.
pub fn diff(old: &[u16], new: &[u16]) -> Vec<DiffPart> {
  let max_d = max_d(old.len(), new.len());
  let mut vf = V::new(max_d);
  let mut vb = V::new(max_d);
  let mut parts = PartsBuilder::default();
  conquer(old, new, &mut vf, &mut vb, &mut parts);
  parts.finish()
}

#[derive(Default)]
struct PartsBuilder {
  parts: Vec<DiffPart>,
  removed: usize,
  added: usize,
}

impl PartsBuilder {
  fn equal(&mut self, len: usize) {
    if len == 0 {
      return;
    }
    self.flush_changes();
    self.push(DiffKind::Equal, len);
  }

  fn removed(&mut self, len: usize) {
    self.removed += len;
  }

  fn added(&mut self, len: usize) {
    self.added += len;
  }

  fn flush_changes(&mut self) {
    let removed = std::mem::take(&mut self.removed);
    let added = std::mem::take(&mut self.added);
    self.push(DiffKind::Removed, removed);
    self.push(DiffKind::Added, added);
  }

  fn push(&mut self, kind: DiffKind, len: usize) {
    if len == 0 {
      return;
    }
    match self.parts.last_mut() {
      Some(last) if last.kind == kind => last.len += len,
      _ => self.parts.push(DiffPart { kind, len }),
    }
  }

  fn finish(mut self) -> Vec<DiffPart> {
    self.flush_changes();
    self.parts
  }
}

/// Furthest reaching x per diagonal, indexed by diagonal.
struct V {
  offset: isize,
  v: Vec<isize>,
}

impl V {
  fn new(max_d: usize) -> Self {
    Self {
      offset: max_d as isize,
      v: vec![0; 2 * max_d + 1],
    }
  }
}

impl Index<isize> for V {
  type Output = isize;

  fn index(&self, k: isize) -> &isize {
    &self.v[(k + self.offset) as usize]
  }
}

impl IndexMut<isize> for V {
  fn index_mut(&mut self, k: isize) -> &mut isize {
    &mut self.v[(k + self.offset) as usize]
  }
}

fn max_d(old_len: usize, new_len: usize) -> usize {
  (old_len + new_len + 1) / 2 + 1
}

fn common_prefix_len(old: &[u16], new: &[u16]) -> usize {
  old.iter().zip(new).take_while(|(a, b)| a == b).count()
}

fn common_suffix_len(old: &[u16], new: &[u16]) -> usize {
  old
    .iter()
    .rev()
    .zip(new.iter().rev())
    .take_while(|(a, b)| a == b)
    .count()
}

fn conquer(
  old: &[u16],
  new: &[u16],
  vf: &mut V,
  vb: &mut V,
  parts: &mut PartsBuilder,
) {
  let prefix = common_prefix_len(old, new);
  parts.equal(prefix);
  let old = &old[prefix..];
  let new = &new[prefix..];
  let suffix = common_suffix_len(old, new);
  let old = &old[..old.len() - suffix];
  let new = &new[..new.len() - suffix];

  if old.is_empty() {
    parts.added(new.len());
  } else if new.is_empty() {
    parts.removed(old.len());
  } else {
    match find_middle_snake(old, new, vf, vb) {
      Some((x, y)) => {
        conquer(&old[..x], &new[..y], vf, vb, parts);
        conquer(&old[x..], &new[y..], vf, vb, parts);
      }
      None => {
        parts.removed(old.len());
        parts.added(new.len());
      }
    }
  }

  parts.equal(suffix);
}

/// Finds the start of the middle snake of an optimal edit script, which
/// splits the problem into two halves of about half the edit distance.
fn find_middle_snake(
  old: &[u16],
  new: &[u16],
  vf: &mut V,
  vb: &mut V,
) -> Option<(usize, usize)> {
  let n = old.len() as isize;
  let m = new.len() as isize;
  let delta = n - m;
  let odd = delta & 1 == 1;
  vf[1] = 0;
  vb[1] = 0;

  let d_max = max_d(old.len(), new.len()) as isize;
  for d in 0..d_max {
    let mut k = d;
    while k >= -d {
      let mut x = if k == -d || (k != d && vf[k - 1] < vf[k + 1]) {
        vf[k + 1]
      } else {
        vf[k - 1] + 1
      };
      let y = x - k;
      let (start_x, start_y) = (x, y);
      if x < n && y < m {
        x += common_prefix_len(&old[x as usize..], &new[y as usize..]) as isize;
      }
      vf[k] = x;
      if odd && (k - delta).abs() <= d - 1 && vf[k] + vb[-(k - delta)] >= n {
        return Some((start_x as usize, start_y as usize));
      }
      k -= 2;
    }

    let mut k = d;
    while k >= -d {
      let mut x = if k == -d || (k != d && vb[k - 1] < vb[k + 1]) {
        vb[k + 1]
      } else {
        vb[k - 1] + 1
      };
      let mut y = x - k;
      if x < n && y < m {
        let advance = common_suffix_len(
          &old[..(n - x) as usize],
          &new[..(m - y) as usize],
        ) as isize;
        x += advance;
        y += advance;
      }
      vb[k] = x;
      if !odd && (k - delta).abs() <= d && vb[k] + vf[-(k - delta)] >= n {
        return Some(((n - x) as usize, (m - y) as usize));
      }
      k -= 2;
    }
  }
  None
}
