//! Architect format: high-level file directives
//!
//! CREATE / MODIFY / DELETE / RENAME / MOVE directives with optional
//! fenced content, for agents that plan at file granularity.

use regex::Regex;
use std::sync::OnceLock;

use crate::edit::{EditOperation, FileEdit};
use crate::error::{Error, Result};
use crate::format::{EditFormat, FormatType};

const PROMPT_TEMPLATE: &str = r#"Describe changes as file directives:

CREATE FILE: src/metrics.rs
```rust
pub fn record(name: &str) {}
```

MODIFY FILE: src/lib.rs
```rust
pub mod metrics;
```

DELETE FILE: src/legacy.rs
RENAME FILE: src/utils.rs -> src/helpers.rs
MOVE FILE: docs/notes.md -> docs/archive/notes.md
"#;

fn directive() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(CREATE|MODIFY|DELETE|RENAME|MOVE) FILE:\s*(.+)$").unwrap())
}

fn rename_paths() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.+?)\s*->\s*(.+)$").unwrap())
}

/// The architect directive format
pub struct ArchitectFormat;

impl ArchitectFormat {
    /// Create the format
    pub fn new() -> Self {
        Self
    }
}

impl Default for ArchitectFormat {
    fn default() -> Self {
        Self::new()
    }
}

impl EditFormat for ArchitectFormat {
    fn format_type(&self) -> FormatType {
        FormatType::Architect
    }

    fn name(&self) -> &str {
        "architect"
    }

    fn description(&self) -> &str {
        "High-level create, modify, delete, rename and move directives"
    }

    fn can_handle(&self, content: &str) -> bool {
        content.lines().any(|line| directive().is_match(line))
    }

    fn parse(&self, content: &str) -> Result<Vec<FileEdit>> {
        let lines: Vec<&str> = content.lines().collect();
        let mut edits = Vec::new();
        let mut index = 0;

        while index < lines.len() {
            let Some(captures) = directive().captures(lines[index]) else {
                index += 1;
                continue;
            };
            let verb = captures[1].to_string();
            let rest = captures[2].trim().to_string();
            index += 1;

            match verb.as_str() {
                "DELETE" => edits.push(FileEdit::delete(rest)),
                "RENAME" | "MOVE" => {
                    let paths = rename_paths().captures(&rest).ok_or_else(|| {
                        Error::MalformedFormat(format!(
                            "{} FILE requires 'old -> new', got '{}'",
                            verb, rest
                        ))
                    })?;
                    let mut edit = FileEdit::rename(paths[1].trim(), paths[2].trim());
                    if verb == "MOVE" {
                        edit.metadata
                            .insert("directive".to_string(), "move".to_string());
                    }
                    edits.push(edit);
                }
                "CREATE" | "MODIFY" => {
                    let (content, next) = read_optional_fence(&lines, index)?;
                    index = next;
                    let edit = if verb == "CREATE" {
                        FileEdit::create(rest, content.unwrap_or_default())
                    } else {
                        FileEdit {
                            file_path: rest,
                            operation: EditOperation::Update,
                            new_content: content,
                            ..Default::default()
                        }
                    };
                    edits.push(edit);
                }
                _ => unreachable!("regex admits only known verbs"),
            }
        }

        if edits.is_empty() {
            return Err(Error::MalformedFormat(
                "no architect directives found".to_string(),
            ));
        }
        Ok(edits)
    }

    fn format(&self, edits: &[FileEdit]) -> Result<String> {
        let mut out = String::new();
        for edit in edits {
            match edit.operation {
                EditOperation::Create => {
                    out.push_str(&format!("CREATE FILE: {}\n", edit.file_path));
                    if let Some(content) = &edit.new_content {
                        if !content.is_empty() {
                            out.push_str(&format!("```\n{}\n```\n", content));
                        }
                    }
                }
                EditOperation::Update => {
                    out.push_str(&format!("MODIFY FILE: {}\n", edit.file_path));
                    if let Some(content) = &edit.new_content {
                        out.push_str(&format!("```\n{}\n```\n", content));
                    }
                }
                EditOperation::Delete => {
                    out.push_str(&format!("DELETE FILE: {}\n", edit.file_path));
                }
                EditOperation::Rename => {
                    let target = edit.new_path().ok_or_else(|| {
                        Error::InvalidEdit(format!(
                            "rename of '{}' has no new_path",
                            edit.file_path
                        ))
                    })?;
                    let verb = if edit.metadata.get("directive").map(|s| s.as_str()) == Some("move")
                    {
                        "MOVE"
                    } else {
                        "RENAME"
                    };
                    out.push_str(&format!("{} FILE: {} -> {}\n", verb, edit.file_path, target));
                }
            }
            out.push('\n');
        }
        Ok(out)
    }

    fn prompt_template(&self) -> &str {
        PROMPT_TEMPLATE
    }
}

/// Read an optional fenced block after a directive
fn read_optional_fence(lines: &[&str], start: usize) -> Result<(Option<String>, usize)> {
    let mut index = start;
    while index < lines.len() && lines[index].trim().is_empty() {
        index += 1;
    }
    if index >= lines.len() || !lines[index].starts_with("```") {
        return Ok((None, start));
    }

    index += 1;
    let mut body = Vec::new();
    while index < lines.len() {
        if lines[index].trim_end() == "```" {
            return Ok((Some(body.join("\n")), index + 1));
        }
        body.push(lines[index]);
        index += 1;
    }
    Err(Error::MalformedFormat("unterminated code fence".to_string()))
}
