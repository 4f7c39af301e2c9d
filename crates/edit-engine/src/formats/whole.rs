//! Whole-file replacement format
//!
//! Recognizes `File:` markers followed by a fenced code block, or a
//! fence whose info string itself names a path. Each block becomes one
//! update replacing the entire file.

use regex::Regex;
use std::sync::OnceLock;

use crate::edit::{EditOperation, FileEdit};
use crate::error::{Error, Result};
use crate::format::{EditFormat, FormatType};

const PROMPT_TEMPLATE: &str = r#"To replace a file entirely, name it and fence the new contents:

File: src/lib.rs
```rust
pub fn answer() -> u32 {
    42
}
```

A fence whose info string is a path works too:

```src/main.rs
fn main() {}
```
"#;

fn file_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^File:\s+(\S.*)$").unwrap())
}

/// Whether a fence info string names a path rather than a language
fn info_is_path(info: &str) -> bool {
    !info.is_empty() && !info.contains(' ') && (info.contains('/') || info.contains('.'))
}

/// The whole-file replacement format
pub struct WholeFileFormat;

impl WholeFileFormat {
    /// Create the format
    pub fn new() -> Self {
        Self
    }
}

impl Default for WholeFileFormat {
    fn default() -> Self {
        Self::new()
    }
}

impl EditFormat for WholeFileFormat {
    fn format_type(&self) -> FormatType {
        FormatType::Whole
    }

    fn name(&self) -> &str {
        "whole"
    }

    fn description(&self) -> &str {
        "Replace entire files with fenced contents"
    }

    fn can_handle(&self, content: &str) -> bool {
        let has_marker = content
            .lines()
            .any(|line| file_marker().is_match(line));
        if has_marker && content.contains("```") {
            return true;
        }
        content.lines().any(|line| {
            line.strip_prefix("```")
                .map(|info| info_is_path(info.trim()))
                .unwrap_or(false)
        })
    }

    fn parse(&self, content: &str) -> Result<Vec<FileEdit>> {
        let mut edits = Vec::new();
        let lines: Vec<&str> = content.lines().collect();
        let mut index = 0;

        while index < lines.len() {
            let line = lines[index];

            // `File:` marker, fence follows
            if let Some(captures) = file_marker().captures(line) {
                let path = captures[1].trim().to_string();
                index += 1;
                while index < lines.len() && lines[index].trim().is_empty() {
                    index += 1;
                }
                if index >= lines.len() || !lines[index].starts_with("```") {
                    return Err(Error::MalformedFormat(format!(
                        "File: marker for '{}' has no fenced content",
                        path
                    )));
                }
                let (body, next) = read_fence_body(&lines, index + 1)?;
                edits.push(FileEdit {
                    file_path: path,
                    operation: EditOperation::Update,
                    new_content: Some(body),
                    ..Default::default()
                });
                index = next;
                continue;
            }

            // Fence whose info string is the path
            if let Some(info) = line.strip_prefix("```") {
                let info = info.trim();
                if info_is_path(info) {
                    let (body, next) = read_fence_body(&lines, index + 1)?;
                    edits.push(FileEdit {
                        file_path: info.to_string(),
                        operation: EditOperation::Update,
                        new_content: Some(body),
                        ..Default::default()
                    });
                    index = next;
                    continue;
                }
            }

            index += 1;
        }

        if edits.is_empty() {
            return Err(Error::MalformedFormat(
                "no whole-file blocks found".to_string(),
            ));
        }
        Ok(edits)
    }

    fn format(&self, edits: &[FileEdit]) -> Result<String> {
        let mut out = String::new();
        for edit in edits {
            let body = edit.new_content.as_deref().ok_or_else(|| {
                Error::InvalidEdit(format!(
                    "whole-file edit for '{}' carries no content",
                    edit.file_path
                ))
            })?;
            out.push_str(&format!("File: {}\n```\n{}\n```\n\n", edit.file_path, body));
        }
        Ok(out)
    }

    fn prompt_template(&self) -> &str {
        PROMPT_TEMPLATE
    }
}

/// Read fence body starting at `start`; returns (body, index past the close)
fn read_fence_body(lines: &[&str], start: usize) -> Result<(String, usize)> {
    let mut body = Vec::new();
    let mut index = start;
    while index < lines.len() {
        if lines[index].trim_end() == "```" {
            return Ok((body.join("\n"), index + 1));
        }
        body.push(lines[index]);
        index += 1;
    }
    Err(Error::MalformedFormat("unterminated code fence".to_string()))
}
