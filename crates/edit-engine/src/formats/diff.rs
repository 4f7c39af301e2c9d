//! Unified-diff format with hunk-by-hunk application

use regex::Regex;
use std::sync::OnceLock;

use crate::edit::{EditOperation, FileEdit};
use crate::error::{Error, Result};
use crate::format::{EditFormat, FormatType};

const PROMPT_TEMPLATE: &str = r#"Express changes as a unified diff:

--- a/src/lib.rs
+++ b/src/lib.rs
@@ -1,3 +1,3 @@
 pub fn answer() -> u32 {
-    41
+    42
 }

Use `--- /dev/null` for new files and `+++ /dev/null` for deletions.
"#;

fn hunk_header() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").unwrap())
}

fn strip_diff_prefix(path: &str) -> &str {
    path.strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path)
}

/// The unified-diff edit format
pub struct DiffFormat;

impl DiffFormat {
    /// Create the format
    pub fn new() -> Self {
        Self
    }
}

impl Default for DiffFormat {
    fn default() -> Self {
        Self::new()
    }
}

impl EditFormat for DiffFormat {
    fn format_type(&self) -> FormatType {
        FormatType::Diff
    }

    fn name(&self) -> &str {
        "diff"
    }

    fn description(&self) -> &str {
        "Unified diffs applied hunk by hunk"
    }

    fn can_handle(&self, content: &str) -> bool {
        let mut saw_old = false;
        let mut saw_new = false;
        for line in content.lines() {
            if line.starts_with("--- ") {
                saw_old = true;
            } else if saw_old && line.starts_with("+++ ") {
                saw_new = true;
            } else if saw_new && hunk_header().is_match(line) {
                return true;
            }
        }
        // A pure deletion has headers but may omit hunks
        saw_old && saw_new && content.contains("+++ /dev/null")
    }

    fn parse(&self, content: &str) -> Result<Vec<FileEdit>> {
        let lines: Vec<&str> = content.lines().collect();
        let mut edits = Vec::new();
        let mut index = 0;

        while index < lines.len() {
            if !lines[index].starts_with("--- ") {
                index += 1;
                continue;
            }

            let old_path = lines[index][4..].trim();
            index += 1;
            if index >= lines.len() || !lines[index].starts_with("+++ ") {
                return Err(Error::MalformedFormat(
                    "diff header missing +++ line".to_string(),
                ));
            }
            let new_path = lines[index][4..].trim();
            index += 1;

            // Collect the hunks verbatim up to the next file header
            let mut hunks = String::new();
            while index < lines.len() && !lines[index].starts_with("--- ") {
                let line = lines[index];
                if hunk_header().is_match(line)
                    || line.starts_with(' ')
                    || line.starts_with('+')
                    || line.starts_with('-')
                    || line.starts_with('\\')
                    || line.is_empty()
                {
                    hunks.push_str(line);
                    hunks.push('\n');
                    index += 1;
                } else {
                    break;
                }
            }

            let edit = if new_path == "/dev/null" {
                FileEdit::delete(strip_diff_prefix(old_path))
            } else {
                let operation = if old_path == "/dev/null" {
                    EditOperation::Create
                } else {
                    EditOperation::Update
                };
                if !hunks.lines().any(|l| hunk_header().is_match(l)) {
                    return Err(Error::MalformedFormat(format!(
                        "no hunks for '{}'",
                        new_path
                    )));
                }
                let mut edit = FileEdit {
                    file_path: strip_diff_prefix(new_path).to_string(),
                    operation,
                    ..Default::default()
                };
                if operation == EditOperation::Create {
                    // Creates still validate as carrying content
                    edit.new_content = Some(String::new());
                }
                edit.metadata.insert("diff".to_string(), hunks);
                edit
            };
            edits.push(edit);
        }

        if edits.is_empty() {
            return Err(Error::MalformedFormat("no diff sections found".to_string()));
        }
        Ok(edits)
    }

    fn format(&self, edits: &[FileEdit]) -> Result<String> {
        let mut out = String::new();
        for edit in edits {
            match edit.operation {
                EditOperation::Delete => {
                    out.push_str(&format!("--- a/{}\n+++ /dev/null\n", edit.file_path));
                }
                EditOperation::Create => {
                    let hunks = edit.metadata.get("diff").ok_or_else(|| {
                        Error::InvalidEdit(format!("diff edit for '{}' has no hunks", edit.file_path))
                    })?;
                    out.push_str(&format!("--- /dev/null\n+++ b/{}\n", edit.file_path));
                    out.push_str(hunks);
                }
                EditOperation::Update => {
                    let hunks = edit.metadata.get("diff").ok_or_else(|| {
                        Error::InvalidEdit(format!("diff edit for '{}' has no hunks", edit.file_path))
                    })?;
                    out.push_str(&format!(
                        "--- a/{}\n+++ b/{}\n",
                        edit.file_path, edit.file_path
                    ));
                    out.push_str(hunks);
                }
                EditOperation::Rename => {
                    return Err(Error::InvalidEdit(
                        "unified diffs cannot express renames".to_string(),
                    ));
                }
            }
        }
        Ok(out)
    }

    fn prompt_template(&self) -> &str {
        PROMPT_TEMPLATE
    }
}

/// Apply unified-diff hunks to file content
///
/// Context and removal lines must match the original exactly; any
/// mismatch rejects the whole patch.
pub(crate) fn apply_unified_diff(
    original: &str,
    hunks: &str,
) -> std::result::Result<String, String> {
    let had_trailing_newline = original.ends_with('\n') || original.is_empty();
    let original_lines: Vec<&str> = if original.is_empty() {
        Vec::new()
    } else {
        original.lines().collect()
    };

    let mut output: Vec<String> = Vec::new();
    // Next original line (0-based) not yet copied to the output
    let mut cursor = 0usize;

    let mut hunk_lines = hunks.lines().peekable();
    let mut saw_hunk = false;

    while let Some(line) = hunk_lines.next() {
        let Some(captures) = hunk_header().captures(line) else {
            if !saw_hunk && !line.trim().is_empty() {
                return Err(format!("expected hunk header, found '{}'", line));
            }
            continue;
        };
        saw_hunk = true;

        let old_start: usize = captures[1].parse().map_err(|_| "bad hunk header")?;
        let old_count: usize = captures
            .get(2)
            .map(|m| m.as_str().parse().unwrap_or(1))
            .unwrap_or(1);

        // Copy unchanged lines before the hunk
        let hunk_begin = old_start.saturating_sub(1);
        if hunk_begin < cursor || hunk_begin > original_lines.len() {
            return Err(format!("hunk start {} out of range", old_start));
        }
        for line in &original_lines[cursor..hunk_begin] {
            output.push((*line).to_string());
        }
        cursor = hunk_begin;

        let mut consumed = 0usize;
        while consumed < old_count || matches!(hunk_lines.peek(), Some(l) if l.starts_with('+')) {
            let Some(body_line) = hunk_lines.peek() else {
                break;
            };
            match body_line.chars().next() {
                Some(' ') | None => {
                    let expected = &body_line.get(1..).unwrap_or("");
                    let actual = original_lines.get(cursor).ok_or_else(|| {
                        format!("context past end of file at line {}", cursor + 1)
                    })?;
                    if actual != expected {
                        return Err(format!(
                            "context mismatch at line {}: expected '{}', found '{}'",
                            cursor + 1,
                            expected,
                            actual
                        ));
                    }
                    output.push((*actual).to_string());
                    cursor += 1;
                    consumed += 1;
                    hunk_lines.next();
                }
                Some('-') => {
                    let expected = &body_line[1..];
                    let actual = original_lines.get(cursor).ok_or_else(|| {
                        format!("removal past end of file at line {}", cursor + 1)
                    })?;
                    if *actual != expected {
                        return Err(format!(
                            "removal mismatch at line {}: expected '{}', found '{}'",
                            cursor + 1,
                            expected,
                            actual
                        ));
                    }
                    cursor += 1;
                    consumed += 1;
                    hunk_lines.next();
                }
                Some('+') => {
                    output.push(body_line[1..].to_string());
                    hunk_lines.next();
                }
                Some('\\') => {
                    // "\ No newline at end of file"
                    hunk_lines.next();
                }
                _ => break,
            }
        }
    }

    if !saw_hunk {
        return Err("patch contains no hunks".to_string());
    }

    // Copy the remainder of the original
    for line in &original_lines[cursor..] {
        output.push((*line).to_string());
    }

    let mut result = output.join("\n");
    if had_trailing_newline && !result.is_empty() {
        result.push('\n');
    }
    Ok(result)
}
