//! Line-based editor format
//!
//! Per-file sections carry INSERT AT LINE / DELETE LINE / REPLACE LINE
//! operations, plus a compact `Ln:` syntax where an empty body means
//! delete. Line numbers are 1-based.

use regex::Regex;
use std::sync::OnceLock;

use crate::edit::{EditOperation, FileEdit};
use crate::error::{Error, Result};
use crate::format::{EditFormat, FormatType};

const PROMPT_TEMPLATE: &str = r#"Express line edits per file:

FILE: src/lib.rs
INSERT AT LINE 3:
use std::fmt;
REPLACE LINE 10:
    let retries = 3;
DELETE LINE 14
DELETE LINE 20-22

The compact form `L7: new text` replaces line 7; `L7:` with an empty
body deletes it.
"#;

fn file_directive() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^FILE:\s*(.+)$").unwrap())
}

fn insert_directive() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^INSERT AT LINE (\d+):?\s*$").unwrap())
}

fn replace_directive() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^REPLACE LINE (\d+):?\s*$").unwrap())
}

fn delete_directive() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^DELETE LINE (\d+)(?:\s*-\s*(\d+))?\s*$").unwrap())
}

fn compact_directive() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^L(\d+):(.*)$").unwrap())
}

fn is_directive(line: &str) -> bool {
    file_directive().is_match(line)
        || insert_directive().is_match(line)
        || replace_directive().is_match(line)
        || delete_directive().is_match(line)
        || compact_directive().is_match(line)
}

fn parse_line_number(text: &str) -> Result<usize> {
    let number: usize = text
        .parse()
        .map_err(|_| Error::MalformedFormat(format!("bad line number '{}'", text)))?;
    if number == 0 {
        return Err(Error::MalformedFormat(
            "line numbers are 1-based".to_string(),
        ));
    }
    Ok(number)
}

/// The line-based editor format
pub struct EditorFormat;

impl EditorFormat {
    /// Create the format
    pub fn new() -> Self {
        Self
    }
}

impl Default for EditorFormat {
    fn default() -> Self {
        Self::new()
    }
}

fn line_edit(
    path: &str,
    op: &str,
    line_number: usize,
    line_count: Option<usize>,
    body: Option<String>,
) -> FileEdit {
    let mut edit = FileEdit {
        file_path: path.to_string(),
        operation: EditOperation::Update,
        new_content: body,
        line_number: Some(line_number),
        line_count,
        ..Default::default()
    };
    edit.metadata.insert("line_op".to_string(), op.to_string());
    edit
}

impl EditFormat for EditorFormat {
    fn format_type(&self) -> FormatType {
        FormatType::Editor
    }

    fn name(&self) -> &str {
        "editor"
    }

    fn description(&self) -> &str {
        "Line-based insert, replace and delete operations"
    }

    fn can_handle(&self, content: &str) -> bool {
        let mut saw_file = false;
        for line in content.lines() {
            if file_directive().is_match(line) {
                saw_file = true;
            } else if saw_file
                && (insert_directive().is_match(line)
                    || replace_directive().is_match(line)
                    || delete_directive().is_match(line)
                    || compact_directive().is_match(line))
            {
                return true;
            }
        }
        false
    }

    fn parse(&self, content: &str) -> Result<Vec<FileEdit>> {
        let lines: Vec<&str> = content.lines().collect();
        let mut edits = Vec::new();
        let mut current_path: Option<String> = None;
        let mut index = 0;

        let require_path = |path: &Option<String>| {
            path.clone().ok_or_else(|| {
                Error::MalformedFormat("line operation with no FILE: line".to_string())
            })
        };

        while index < lines.len() {
            let line = lines[index];

            if let Some(captures) = file_directive().captures(line) {
                current_path = Some(captures[1].trim().to_string());
                index += 1;
            } else if let Some(captures) = insert_directive().captures(line) {
                let path = require_path(&current_path)?;
                let number = parse_line_number(&captures[1])?;
                let (body, next) = read_body(&lines, index + 1);
                edits.push(line_edit(&path, "insert", number, None, Some(body)));
                index = next;
            } else if let Some(captures) = replace_directive().captures(line) {
                let path = require_path(&current_path)?;
                let number = parse_line_number(&captures[1])?;
                let (body, next) = read_body(&lines, index + 1);
                edits.push(line_edit(&path, "replace", number, None, Some(body)));
                index = next;
            } else if let Some(captures) = delete_directive().captures(line) {
                let path = require_path(&current_path)?;
                let start = parse_line_number(&captures[1])?;
                let count = match captures.get(2) {
                    Some(end) => {
                        let end = parse_line_number(end.as_str())?;
                        if end < start {
                            return Err(Error::MalformedFormat(format!(
                                "delete range {}-{} is inverted",
                                start, end
                            )));
                        }
                        Some(end - start + 1)
                    }
                    None => None,
                };
                edits.push(line_edit(&path, "delete", start, count, None));
                index += 1;
            } else if let Some(captures) = compact_directive().captures(line) {
                let path = require_path(&current_path)?;
                let number = parse_line_number(&captures[1])?;
                let body = captures[2].strip_prefix(' ').unwrap_or(&captures[2]).to_string();
                if body.is_empty() {
                    edits.push(line_edit(&path, "delete", number, None, None));
                } else {
                    edits.push(line_edit(&path, "replace", number, None, Some(body)));
                }
                index += 1;
            } else {
                index += 1;
            }
        }

        if edits.is_empty() {
            return Err(Error::MalformedFormat(
                "no line operations found".to_string(),
            ));
        }
        Ok(edits)
    }

    fn format(&self, edits: &[FileEdit]) -> Result<String> {
        let mut out = String::new();
        let mut last_path: Option<&str> = None;

        for edit in edits {
            let number = edit.line_number.ok_or_else(|| {
                Error::InvalidEdit(format!("editor edit for '{}' has no line number", edit.file_path))
            })?;
            let op = edit.metadata.get("line_op").map(|s| s.as_str()).unwrap_or("replace");

            if last_path != Some(edit.file_path.as_str()) {
                out.push_str(&format!("FILE: {}\n", edit.file_path));
                last_path = Some(edit.file_path.as_str());
            }

            match op {
                "insert" => {
                    out.push_str(&format!(
                        "INSERT AT LINE {}:\n{}\n",
                        number,
                        edit.new_content.as_deref().unwrap_or("")
                    ));
                }
                "replace" => {
                    out.push_str(&format!(
                        "REPLACE LINE {}:\n{}\n",
                        number,
                        edit.new_content.as_deref().unwrap_or("")
                    ));
                }
                "delete" => match edit.line_count {
                    Some(count) if count > 1 => {
                        out.push_str(&format!("DELETE LINE {}-{}\n", number, number + count - 1));
                    }
                    _ => out.push_str(&format!("DELETE LINE {}\n", number)),
                },
                other => {
                    return Err(Error::InvalidEdit(format!(
                        "unknown line operation '{}'",
                        other
                    )));
                }
            }
        }
        Ok(out)
    }

    fn prompt_template(&self) -> &str {
        PROMPT_TEMPLATE
    }
}

/// Collect body lines until the next directive; returns (body, next index)
fn read_body(lines: &[&str], start: usize) -> (String, usize) {
    let mut body = Vec::new();
    let mut index = start;
    while index < lines.len() && !is_directive(lines[index]) {
        body.push(lines[index]);
        index += 1;
    }
    while body.last().map(|l| l.trim().is_empty()).unwrap_or(false) {
        body.pop();
    }
    (body.join("\n"), index)
}
