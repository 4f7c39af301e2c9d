//! Ask format: clarification requests that never mutate files
//!
//! Parses QUESTION / PROPOSED CHANGE / CONFIRM / CLARIFICATION entries
//! into annotation-only records; the pending proposals live in edit
//! metadata with an empty file path, as an out-of-band signal to the
//! caller.

use regex::Regex;
use std::sync::OnceLock;

use crate::edit::FileEdit;
use crate::error::{Error, Result};
use crate::format::{EditFormat, FormatType};

const PROMPT_TEMPLATE: &str = r#"To ask before editing, emit entries instead of changes:

QUESTION: Should the retry budget stay at 3?
PROPOSED CHANGE: Extract the probe loop into its own module.
CONFIRM: Delete src/legacy.rs entirely?
CLARIFICATION: Which config file is authoritative in production?
"#;

fn keyword() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(QUESTION|PROPOSED CHANGE|CONFIRM|CLARIFICATION):\s*(.*)$").unwrap()
    })
}

fn ask_type_key(verb: &str) -> &'static str {
    match verb {
        "QUESTION" => "question",
        "PROPOSED CHANGE" => "proposed_change",
        "CONFIRM" => "confirm",
        _ => "clarification",
    }
}

fn ask_type_verb(key: &str) -> &'static str {
    match key {
        "question" => "QUESTION",
        "proposed_change" => "PROPOSED CHANGE",
        "confirm" => "CONFIRM",
        _ => "CLARIFICATION",
    }
}

/// The ask format
pub struct AskFormat;

impl AskFormat {
    /// Create the format
    pub fn new() -> Self {
        Self
    }
}

impl Default for AskFormat {
    fn default() -> Self {
        Self::new()
    }
}

impl EditFormat for AskFormat {
    fn format_type(&self) -> FormatType {
        FormatType::Ask
    }

    fn name(&self) -> &str {
        "ask"
    }

    fn description(&self) -> &str {
        "Clarification requests recorded in metadata; no file mutations"
    }

    fn can_handle(&self, content: &str) -> bool {
        content.lines().any(|line| keyword().is_match(line))
    }

    fn parse(&self, content: &str) -> Result<Vec<FileEdit>> {
        let mut edits: Vec<FileEdit> = Vec::new();
        let mut current: Option<(String, Vec<String>)> = None;

        let finish = |entry: Option<(String, Vec<String>)>, edits: &mut Vec<FileEdit>| {
            if let Some((ask_type, text_lines)) = entry {
                let mut edit = FileEdit::default();
                edit.metadata.insert("ask_type".to_string(), ask_type);
                edit.metadata
                    .insert("text".to_string(), text_lines.join("\n").trim().to_string());
                edits.push(edit);
            }
        };

        for line in content.lines() {
            if let Some(captures) = keyword().captures(line) {
                finish(current.take(), &mut edits);
                current = Some((
                    ask_type_key(&captures[1]).to_string(),
                    vec![captures[2].to_string()],
                ));
            } else if let Some((_, text_lines)) = &mut current {
                text_lines.push(line.to_string());
            }
        }
        finish(current, &mut edits);

        if edits.is_empty() {
            return Err(Error::MalformedFormat("no ask entries found".to_string()));
        }
        Ok(edits)
    }

    fn format(&self, edits: &[FileEdit]) -> Result<String> {
        let mut out = String::new();
        for edit in edits {
            let ask_type = edit.metadata.get("ask_type").ok_or_else(|| {
                Error::InvalidEdit("ask edit has no ask_type metadata".to_string())
            })?;
            let text = edit.metadata.get("text").map(|s| s.as_str()).unwrap_or("");
            out.push_str(&format!("{}: {}\n", ask_type_verb(ask_type), text));
        }
        Ok(out)
    }

    fn prompt_template(&self) -> &str {
        PROMPT_TEMPLATE
    }
}
