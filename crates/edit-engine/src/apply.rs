//! Applies parsed edits to files on disk
//!
//! Every batch is staged in memory first: each operation transforms the
//! staged buffer for its file, and only when the whole batch has been
//! computed successfully is anything written. A semantic failure
//! (regex error, missing required match, line out of range) therefore
//! leaves every target file byte-identical to its pre-application
//! contents.

use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::edit::{EditOperation, FileEdit};
use crate::error::{Error, Result};
use crate::formats::apply_unified_diff;

/// Apply-time options
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions {
    /// Snapshot each mutated file to a `.bak` sibling before writing
    pub backup: bool,
}

/// What an applied batch did
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    /// Files written, deleted or renamed, in application order
    pub changed_files: Vec<String>,
    /// Backup files created
    pub backups: Vec<String>,
    /// Annotation-only edits (ask proposals) that touched nothing
    pub annotations: Vec<FileEdit>,
}

/// Applies edit batches against a root directory
///
/// Concurrent `apply` calls on one applier are serialized by an
/// internal mutex; separate appliers aimed at the same paths are the
/// caller's responsibility.
pub struct EditApplier {
    root: PathBuf,
    lock: Mutex<()>,
}

impl EditApplier {
    /// Create an applier resolving relative paths against `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }

    /// Apply a batch without backups
    pub async fn apply(&self, edits: &[FileEdit]) -> Result<ApplyReport> {
        self.apply_with_options(edits, ApplyOptions::default()).await
    }

    /// Apply a batch of edits atomically
    pub async fn apply_with_options(
        &self,
        edits: &[FileEdit],
        options: ApplyOptions,
    ) -> Result<ApplyReport> {
        let _guard = self.lock.lock().await;

        let mut report = ApplyReport::default();
        // Staged file states: Some(content) pending write, None pending delete.
        // Paths absent from the map are untouched.
        let mut staged: HashMap<String, Option<String>> = HashMap::new();
        let mut touch_order: Vec<String> = Vec::new();

        for edit in edits {
            if edit.is_annotation() {
                report.annotations.push(edit.clone());
                continue;
            }
            edit.validate()?;
            self.stage(edit, &mut staged, &mut touch_order).await?;
        }

        // Everything staged cleanly; now touch the disk.
        for path in &touch_order {
            let Some(state) = staged.get(path) else {
                continue;
            };
            let disk_path = self.root.join(path);

            if options.backup && disk_path.exists() {
                let backup_path = sibling_backup(&disk_path);
                tokio::fs::copy(&disk_path, &backup_path)
                    .await
                    .map_err(|e| Error::EditFailed {
                        path: path.clone(),
                        reason: format!("backup failed: {}", e),
                    })?;
                report.backups.push(backup_path.to_string_lossy().into_owned());
            }

            match state {
                Some(content) => {
                    if let Some(parent) = disk_path.parent() {
                        if !parent.as_os_str().is_empty() {
                            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                                Error::EditFailed {
                                    path: path.clone(),
                                    reason: format!("creating parent directories: {}", e),
                                }
                            })?;
                        }
                    }
                    tokio::fs::write(&disk_path, content)
                        .await
                        .map_err(|e| Error::EditFailed {
                            path: path.clone(),
                            reason: e.to_string(),
                        })?;
                    debug!("Wrote {} ({} bytes)", path, content.len());
                }
                None => {
                    if disk_path.exists() {
                        tokio::fs::remove_file(&disk_path)
                            .await
                            .map_err(|e| Error::EditFailed {
                                path: path.clone(),
                                reason: e.to_string(),
                            })?;
                        debug!("Removed {}", path);
                    }
                }
            }
            report.changed_files.push(path.clone());
        }

        info!(
            "Applied {} edits across {} files",
            edits.len(),
            report.changed_files.len()
        );
        Ok(report)
    }

    /// Stage one edit against the in-memory overlay
    async fn stage(
        &self,
        edit: &FileEdit,
        staged: &mut HashMap<String, Option<String>>,
        touch_order: &mut Vec<String>,
    ) -> Result<()> {
        let path = edit.file_path.clone();
        let fail = |reason: String| Error::EditFailed {
            path: path.clone(),
            reason,
        };

        let touch = |p: &str, order: &mut Vec<String>| {
            if !order.iter().any(|existing| existing == p) {
                order.push(p.to_string());
            }
        };

        match edit.operation {
            EditOperation::Create => {
                let content = if let Some(hunks) = edit.metadata.get("diff") {
                    apply_unified_diff("", hunks).map_err(fail)?
                } else {
                    edit.new_content.clone().unwrap_or_default()
                };
                staged.insert(path.clone(), Some(content));
                touch(&path, touch_order);
            }
            EditOperation::Delete => {
                let current = self.current(&path, staged).await?;
                if current.is_none() {
                    return Err(fail("no such file".to_string()));
                }
                staged.insert(path.clone(), None);
                touch(&path, touch_order);
            }
            EditOperation::Rename => {
                let target = edit
                    .new_path()
                    .expect("validate() guarantees new_path")
                    .to_string();
                let current = self
                    .current(&path, staged)
                    .await?
                    .ok_or_else(|| fail("no such file".to_string()))?;
                staged.insert(target.clone(), Some(current));
                staged.insert(path.clone(), None);
                touch(&path, touch_order);
                touch(&target, touch_order);
            }
            EditOperation::Update => {
                let next = if let Some(hunks) = edit.metadata.get("diff") {
                    let original = self
                        .current(&path, staged)
                        .await?
                        .ok_or_else(|| fail("no such file".to_string()))?;
                    apply_unified_diff(&original, hunks).map_err(fail)?
                } else if edit.search_pattern.is_some() {
                    let original = self
                        .current(&path, staged)
                        .await?
                        .ok_or_else(|| fail("no such file".to_string()))?;
                    apply_search_replace(&original, edit).map_err(fail)?
                } else if edit.line_number.is_some() {
                    let original = self
                        .current(&path, staged)
                        .await?
                        .ok_or_else(|| fail("no such file".to_string()))?;
                    apply_line_operation(&original, edit).map_err(fail)?
                } else if let Some(content) = &edit.new_content {
                    content.clone()
                } else {
                    debug!("Update for '{}' carries no change, skipping", path);
                    return Ok(());
                };
                staged.insert(path.clone(), Some(next));
                touch(&path, touch_order);
            }
        }
        Ok(())
    }

    /// Staged content for a path, falling back to disk
    async fn current(
        &self,
        path: &str,
        staged: &HashMap<String, Option<String>>,
    ) -> Result<Option<String>> {
        if let Some(state) = staged.get(path) {
            return Ok(state.clone());
        }

        match tokio::fs::read_to_string(self.root.join(path)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::EditFailed {
                path: path.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

fn sibling_backup(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".bak");
    path.with_file_name(name)
}

/// Literal or regex replacement with a bounded count
///
/// `count` of `-1` replaces every match; a positive count requires at
/// least one match to exist.
fn apply_search_replace(content: &str, edit: &FileEdit) -> std::result::Result<String, String> {
    let pattern = edit
        .search_pattern
        .as_deref()
        .ok_or("missing search pattern")?;
    let replacement = edit.replace_with.as_deref().unwrap_or("");
    let count = edit.replace_count();

    if edit.is_regex() {
        let re = Regex::new(pattern).map_err(|e| format!("invalid regex '{}': {}", pattern, e))?;
        if count > 0 && !re.is_match(content) {
            return Err(format!("required match not found: /{}/", pattern));
        }
        let limit = if count < 0 { 0 } else { count as usize };
        Ok(re.replacen(content, limit, replacement).into_owned())
    } else {
        let occurrences = content.matches(pattern).count();
        if count > 0 && occurrences == 0 {
            return Err(format!("required match not found: '{}'", pattern));
        }
        if count < 0 {
            Ok(content.replace(pattern, replacement))
        } else {
            Ok(content.replacen(pattern, replacement, count as usize))
        }
    }
}

/// One line-based operation against the buffer
fn apply_line_operation(content: &str, edit: &FileEdit) -> std::result::Result<String, String> {
    let had_trailing_newline = content.ends_with('\n');
    let mut lines: Vec<String> = if content.is_empty() {
        Vec::new()
    } else {
        content.lines().map(String::from).collect()
    };

    let number = edit.line_number.ok_or("missing line number")?;
    let op = edit
        .metadata
        .get("line_op")
        .map(|s| s.as_str())
        .unwrap_or("replace");
    let body: Vec<String> = edit
        .new_content
        .as_deref()
        .map(|c| c.lines().map(String::from).collect())
        .unwrap_or_default();

    match op {
        "insert" => {
            if number > lines.len() + 1 {
                return Err(format!(
                    "insert at line {} beyond end of {}-line file",
                    number,
                    lines.len()
                ));
            }
            lines.splice((number - 1)..(number - 1), body);
        }
        "replace" => {
            if number > lines.len() {
                return Err(format!(
                    "replace of line {} beyond end of {}-line file",
                    number,
                    lines.len()
                ));
            }
            lines.splice((number - 1)..number, body);
        }
        "delete" => {
            let count = edit.line_count.unwrap_or(1);
            let end = number + count - 1;
            if end > lines.len() {
                return Err(format!(
                    "delete of lines {}-{} beyond end of {}-line file",
                    number,
                    end,
                    lines.len()
                ));
            }
            lines.drain((number - 1)..end);
        }
        other => return Err(format!("unknown line operation '{}'", other)),
    }

    let mut result = lines.join("\n");
    if had_trailing_newline && !result.is_empty() {
        result.push('\n');
    }
    Ok(result)
}
