//! Idempotent persistence of generated documents.
//!
//! Every write goes through a tempfile in the target directory followed by a
//! rename. Writers to the same path are serialised by a per-path lock held
//! for the whole read-merge-write cycle.

use crate::error::{FlowError, Result};
use crate::io;
use crate::markdown::{self, Section};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    CreateOnly,
    OverwriteWhole,
    MergeSections,
}

impl WriteMode {
    pub fn as_str(self) -> &'static str {
        match self {
            WriteMode::CreateOnly => "create-only",
            WriteMode::OverwriteWhole => "overwrite",
            WriteMode::MergeSections => "merge",
        }
    }
}

impl std::str::FromStr for WriteMode {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.replace('_', "-").as_str() {
            "create-only" | "create" => Ok(WriteMode::CreateOnly),
            "overwrite" | "overwrite-whole" => Ok(WriteMode::OverwriteWhole),
            "merge" | "merge-sections" => Ok(WriteMode::MergeSections),
            _ => Err(FlowError::InvalidConfig(format!(
                "unknown write mode '{s}' (expected create-only, overwrite or merge)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WriteOutcome {
    Created,
    Overwritten,
    Merged {
        replaced: Vec<String>,
        appended: Vec<String>,
    },
    Unchanged,
}

impl WriteOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            WriteOutcome::Created => "created",
            WriteOutcome::Overwritten => "overwritten",
            WriteOutcome::Merged { .. } => "merged",
            WriteOutcome::Unchanged => "unchanged",
        }
    }
}

// ---------------------------------------------------------------------------
// Section merge
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merge {
    pub text: String,
    pub replaced: Vec<String>,
    pub appended: Vec<String>,
}

/// Merge `update` into `existing` section by section.
///
/// Both documents are split at the smallest heading level used by `update`.
/// Existing sections whose title matches an update section are replaced in
/// place, keeping the blank lines that separated them from the next section;
/// unmatched update sections are appended in update order. The existing
/// preamble and untouched sections are kept byte-for-byte. Text in the
/// update before its first heading is ignored, unless the update has no
/// headings at all, in which case it replaces the preamble. A preamble that
/// opens with YAML frontmatter is never replaced.
pub fn merge_sections(existing: &str, update: &str) -> Merge {
    let Some(level) = markdown::top_level(update) else {
        return merge_preamble(existing, update);
    };

    let mut pending: Vec<(String, String, &str)> = markdown::split_sections(update, level)
        .into_iter()
        .filter_map(|s| s.heading.map(|h| (h.key(), h.title, s.text)))
        .collect();

    let mut out = String::with_capacity(existing.len() + update.len());
    let mut replaced = Vec::new();

    for Section { heading, text } in markdown::split_sections(existing, level) {
        let matched = heading.as_ref().and_then(|h| {
            let key = h.key();
            pending.iter().position(|(k, _, _)| *k == key)
        });
        let Some(i) = matched else {
            out.push_str(text);
            continue;
        };
        let (_, title, body) = pending.remove(i);
        if body.trim_end() == text.trim_end() {
            out.push_str(text);
            continue;
        }
        out.push_str(body.trim_end());
        out.push_str(trailing_whitespace(text));
        replaced.push(title);
    }

    let mut appended = Vec::new();
    for (_, title, body) in pending {
        if !out.is_empty() {
            let trimmed = out.trim_end_matches('\n').len();
            out.truncate(trimmed);
            out.push_str("\n\n");
        }
        out.push_str(body.trim_end());
        out.push('\n');
        appended.push(title);
    }

    if replaced.is_empty() && appended.is_empty() {
        out = existing.to_string();
    }

    Merge {
        text: out,
        replaced,
        appended,
    }
}

fn merge_preamble(existing: &str, update: &str) -> Merge {
    let sections = markdown::split_sections(existing, 6);
    let old = sections.first().map(|s| s.text).unwrap_or_default();
    if update.trim().is_empty()
        || old.trim_end() == update.trim_end()
        || markdown::split_frontmatter(existing).is_some()
    {
        return Merge {
            text: existing.to_string(),
            replaced: vec![],
            appended: vec![],
        };
    }
    let mut out = update.trim_end().to_string();
    out.push_str(if sections.len() > 1 { "\n\n" } else { "\n" });
    for s in sections.iter().skip(1) {
        out.push_str(s.text);
    }
    Merge {
        text: out,
        replaced: vec!["(preamble)".to_string()],
        appended: vec![],
    }
}

/// Trailing whitespace of a section, or a single newline if it has none.
fn trailing_whitespace(text: &str) -> &str {
    let tail = &text[text.trim_end().len()..];
    if tail.is_empty() {
        "\n"
    } else {
        tail
    }
}

// ---------------------------------------------------------------------------
// ArtifactWriter
// ---------------------------------------------------------------------------

/// Writes artifacts with [`WriteMode`] semantics.
///
/// Clones share the same lock table, so one writer can be handed to
/// concurrent tasks.
#[derive(Clone, Default)]
pub struct ArtifactWriter {
    locks: Arc<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>>,
}

impl ArtifactWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(path.to_path_buf()).or_default())
    }

    /// Drop the table entry for `path` once no other writer holds it.
    fn release(&self, path: &Path, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // one reference in the table, one here
        if Arc::strong_count(&lock) == 2 {
            locks.remove(path);
        }
    }

    pub fn write(&self, path: &Path, content: &str, mode: WriteMode) -> Result<WriteOutcome> {
        let lock = self.lock_for(path);
        let outcome = {
            let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
            self.write_locked(path, content, mode)
        };
        self.release(path, lock);
        outcome
    }

    fn write_locked(&self, path: &Path, content: &str, mode: WriteMode) -> Result<WriteOutcome> {
        let outcome = match mode {
            WriteMode::CreateOnly => {
                if !io::write_if_missing(path, content.as_bytes())? {
                    return Err(FlowError::ArtifactExists(path.to_path_buf()));
                }
                WriteOutcome::Created
            }
            WriteMode::OverwriteWhole => match io::read_optional(path)? {
                Some(current) if current == content => WriteOutcome::Unchanged,
                Some(_) => {
                    io::atomic_write(path, content.as_bytes())?;
                    WriteOutcome::Overwritten
                }
                None => {
                    io::atomic_write(path, content.as_bytes())?;
                    WriteOutcome::Created
                }
            },
            WriteMode::MergeSections => self.merge_into(path, content)?,
        };

        tracing::debug!(path = %path.display(), mode = mode.as_str(), outcome = outcome.label(), "artifact write");
        Ok(outcome)
    }

    /// Read, merge, then re-read before persisting. If another process
    /// changed the file in between, the merge is recomputed once against the
    /// new content; a second change is a `WriteConflict`.
    fn merge_into(&self, path: &Path, update: &str) -> Result<WriteOutcome> {
        let Some(base) = io::read_optional(path)? else {
            io::atomic_write(path, update.as_bytes())?;
            return Ok(WriteOutcome::Created);
        };
        merge_checked(path, base, update, || io::read_optional(path))
    }
}

/// Merge `update` into `base` and persist it, provided `reread` still
/// returns `base`. One mismatch recomputes against the new content; a second
/// is a `WriteConflict`.
fn merge_checked(
    path: &Path,
    mut base: String,
    update: &str,
    mut reread: impl FnMut() -> Result<Option<String>>,
) -> Result<WriteOutcome> {
    for attempt in 0..2 {
        let merge = merge_sections(&base, update);
        if merge.replaced.is_empty() && merge.appended.is_empty() {
            return Ok(WriteOutcome::Unchanged);
        }
        let current = reread()?.unwrap_or_default();
        if current == base {
            io::atomic_write(path, merge.text.as_bytes())?;
            return Ok(WriteOutcome::Merged {
                replaced: merge.replaced,
                appended: merge.appended,
            });
        }
        tracing::warn!(path = %path.display(), attempt, "artifact changed during merge, recomputing");
        base = current;
    }
    Err(FlowError::WriteConflict(path.to_path_buf()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
