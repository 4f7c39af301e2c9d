//! Search-replace format
//!
//! Three accepted styles: conflict-marker blocks, keyword blocks and
//! inline pairs. Every pair becomes one update carrying a search
//! pattern and its replacement.

use regex::Regex;
use std::sync::OnceLock;

use crate::edit::FileEdit;
use crate::error::{Error, Result};
use crate::format::{EditFormat, FormatType};

const PROMPT_TEMPLATE: &str = r#"Express replacements as conflict-marker blocks:

src/lib.rs
<<<<<<< SEARCH
fn answer() -> u32 { 41 }
=======
fn answer() -> u32 { 42 }
>>>>>>> REPLACE

Keyword blocks are also accepted:

FILE: src/lib.rs
SEARCH:
fn answer() -> u32 { 41 }
REPLACE:
fn answer() -> u32 { 42 }

As are inline pairs:

file: src/lib.rs
search: 41
replace: 42
"#;

const SEARCH_MARKER: &str = "<<<<<<< SEARCH";
const DIVIDER: &str = "=======";
const REPLACE_MARKER: &str = ">>>>>>> REPLACE";

fn keyword_search() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^SEARCH:\s*$").unwrap())
}

fn keyword_replace() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^REPLACE:\s*$").unwrap())
}

fn inline_search() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^search:\s*(.*)$").unwrap())
}

fn inline_replace() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^replace:\s*(.*)$").unwrap())
}

/// The search-replace edit format
pub struct SearchReplaceFormat;

impl SearchReplaceFormat {
    /// Create the format
    pub fn new() -> Self {
        Self
    }

    /// Conflict-marker style: path line, then SEARCH/REPLACE block
    fn parse_conflict_markers(&self, content: &str) -> Result<Vec<FileEdit>> {
        let mut edits = Vec::new();
        let mut current_path: Option<String> = None;
        let mut lines = content.lines().peekable();

        while let Some(line) = lines.next() {
            let trimmed = line.trim_end();
            if trimmed == SEARCH_MARKER {
                let path = current_path.clone().ok_or_else(|| {
                    Error::MalformedFormat("SEARCH block with no preceding file path".to_string())
                })?;

                let mut search = Vec::new();
                let mut found_divider = false;
                for line in lines.by_ref() {
                    if line.trim_end() == DIVIDER {
                        found_divider = true;
                        break;
                    }
                    search.push(line);
                }
                if !found_divider {
                    return Err(Error::MalformedFormat(
                        "SEARCH block missing ======= divider".to_string(),
                    ));
                }

                let mut replace = Vec::new();
                let mut found_end = false;
                for line in lines.by_ref() {
                    if line.trim_end() == REPLACE_MARKER {
                        found_end = true;
                        break;
                    }
                    replace.push(line);
                }
                if !found_end {
                    return Err(Error::MalformedFormat(
                        "SEARCH block missing REPLACE terminator".to_string(),
                    ));
                }

                edits.push(FileEdit::search_replace(
                    path,
                    search.join("\n"),
                    replace.join("\n"),
                ));
            } else if !trimmed.is_empty() && !trimmed.starts_with("```") {
                current_path = Some(trimmed.trim().to_string());
            }
        }

        if edits.is_empty() {
            return Err(Error::MalformedFormat(
                "no search-replace blocks found".to_string(),
            ));
        }
        Ok(edits)
    }

    /// Keyword style: FILE:, SEARCH: body, REPLACE: body
    fn parse_keyword_blocks(&self, content: &str) -> Result<Vec<FileEdit>> {
        let lines: Vec<&str> = content.lines().collect();
        let mut edits = Vec::new();
        let mut current_path: Option<String> = None;
        let mut index = 0;

        let is_boundary = |line: &str| {
            line.starts_with("FILE:") || keyword_search().is_match(line)
        };

        while index < lines.len() {
            let line = lines[index];
            if let Some(path) = line.strip_prefix("FILE:") {
                current_path = Some(path.trim().to_string());
                index += 1;
            } else if keyword_search().is_match(line) {
                let path = current_path.clone().ok_or_else(|| {
                    Error::MalformedFormat("SEARCH: block with no FILE: line".to_string())
                })?;
                index += 1;

                let mut search = Vec::new();
                while index < lines.len() && !keyword_replace().is_match(lines[index]) {
                    if is_boundary(lines[index]) {
                        return Err(Error::MalformedFormat(
                            "SEARCH: block missing REPLACE:".to_string(),
                        ));
                    }
                    search.push(lines[index]);
                    index += 1;
                }
                if index >= lines.len() {
                    return Err(Error::MalformedFormat(
                        "SEARCH: block missing REPLACE:".to_string(),
                    ));
                }
                index += 1; // past REPLACE:

                let mut replace = Vec::new();
                while index < lines.len() && !is_boundary(lines[index]) {
                    replace.push(lines[index]);
                    index += 1;
                }
                while replace.last().map(|l| l.trim().is_empty()).unwrap_or(false) {
                    replace.pop();
                }

                edits.push(FileEdit::search_replace(
                    path,
                    search.join("\n"),
                    replace.join("\n"),
                ));
            } else {
                index += 1;
            }
        }

        if edits.is_empty() {
            return Err(Error::MalformedFormat(
                "no keyword search-replace blocks found".to_string(),
            ));
        }
        Ok(edits)
    }

    /// Inline style: file:, then single-line search:/replace: pairs
    fn parse_inline(&self, content: &str) -> Result<Vec<FileEdit>> {
        let mut edits = Vec::new();
        let mut current_path: Option<String> = None;
        let mut pending_search: Option<String> = None;

        for line in content.lines() {
            if let Some(path) = line.strip_prefix("file:") {
                current_path = Some(path.trim().to_string());
            } else if let Some(captures) = inline_search().captures(line) {
                if pending_search.is_some() {
                    return Err(Error::MalformedFormat(
                        "search: without matching replace:".to_string(),
                    ));
                }
                pending_search = Some(captures[1].to_string());
            } else if let Some(captures) = inline_replace().captures(line) {
                let search = pending_search.take().ok_or_else(|| {
                    Error::MalformedFormat("replace: without preceding search:".to_string())
                })?;
                let path = current_path.clone().ok_or_else(|| {
                    Error::MalformedFormat("inline pair with no file: line".to_string())
                })?;
                edits.push(FileEdit::search_replace(path, search, captures[1].to_string()));
            }
        }

        if pending_search.is_some() {
            return Err(Error::MalformedFormat(
                "search: without matching replace:".to_string(),
            ));
        }
        if edits.is_empty() {
            return Err(Error::MalformedFormat(
                "no inline search-replace pairs found".to_string(),
            ));
        }
        Ok(edits)
    }
}

impl Default for SearchReplaceFormat {
    fn default() -> Self {
        Self::new()
    }
}

impl EditFormat for SearchReplaceFormat {
    fn format_type(&self) -> FormatType {
        FormatType::SearchReplace
    }

    fn name(&self) -> &str {
        "search-replace"
    }

    fn description(&self) -> &str {
        "Search and replace blocks in marker, keyword or inline style"
    }

    fn can_handle(&self, content: &str) -> bool {
        if content.contains(SEARCH_MARKER) && content.contains(REPLACE_MARKER) {
            return true;
        }
        if keyword_search().is_match(content) && keyword_replace().is_match(content) {
            return true;
        }
        inline_search().is_match(content) && inline_replace().is_match(content)
    }

    fn parse(&self, content: &str) -> Result<Vec<FileEdit>> {
        if content.contains(SEARCH_MARKER) {
            self.parse_conflict_markers(content)
        } else if keyword_search().is_match(content) {
            self.parse_keyword_blocks(content)
        } else if inline_search().is_match(content) {
            self.parse_inline(content)
        } else {
            Err(Error::MalformedFormat(
                "no search-replace markers found".to_string(),
            ))
        }
    }

    fn format(&self, edits: &[FileEdit]) -> Result<String> {
        let mut out = String::new();
        for edit in edits {
            let search = edit.search_pattern.as_deref().ok_or_else(|| {
                Error::InvalidEdit(format!(
                    "search-replace edit for '{}' has no pattern",
                    edit.file_path
                ))
            })?;
            let replace = edit.replace_with.as_deref().unwrap_or("");
            out.push_str(&format!(
                "{}\n{}\n{}\n{}\n{}\n{}\n\n",
                edit.file_path, SEARCH_MARKER, search, DIVIDER, replace, REPLACE_MARKER
            ));
        }
        Ok(out)
    }

    fn prompt_template(&self) -> &str {
        PROMPT_TEMPLATE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_marker_style() {
        let format = SearchReplaceFormat::new();
        let content = "src/lib.rs\n<<<<<<< SEARCH\nfn old() {}\n=======\nfn new() {}\n>>>>>>> REPLACE\n";

        assert!(format.can_handle(content));
        let edits = format.parse(content).unwrap();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].file_path, "src/lib.rs");
        assert_eq!(edits[0].search_pattern.as_deref(), Some("fn old() {}"));
        assert_eq!(edits[0].replace_with.as_deref(), Some("fn new() {}"));
    }

    #[test]
    fn test_multiple_blocks_same_file() {
        let format = SearchReplaceFormat::new();
        let content = "\
src/lib.rs
<<<<<<< SEARCH
alpha
=======
ALPHA
>>>>>>> REPLACE

<<<<<<< SEARCH
beta
=======
BETA
>>>>>>> REPLACE
";
        let edits = format.parse(content).unwrap();
        assert_eq!(edits.len(), 2);
        assert_eq!(edits[1].file_path, "src/lib.rs");
        assert_eq!(edits[1].search_pattern.as_deref(), Some("beta"));
    }

    #[test]
    fn test_keyword_style() {
        let format = SearchReplaceFormat::new();
        let content = "\
FILE: src/config.rs
SEARCH:
let retries = 2;
REPLACE:
let retries = 3;
";
        assert!(format.can_handle(content));
        let edits = format.parse(content).unwrap();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].file_path, "src/config.rs");
        assert_eq!(edits[0].search_pattern.as_deref(), Some("let retries = 2;"));
        assert_eq!(edits[0].replace_with.as_deref(), Some("let retries = 3;"));
    }

    #[test]
    fn test_inline_style() {
        let format = SearchReplaceFormat::new();
        let content = "file: src/x.rs\nsearch: foo\nreplace: bar\nsearch: baz\nreplace: qux\n";

        assert!(format.can_handle(content));
        let edits = format.parse(content).unwrap();
        assert_eq!(edits.len(), 2);
        assert_eq!(edits[0].search_pattern.as_deref(), Some("foo"));
        assert_eq!(edits[1].replace_with.as_deref(), Some("qux"));
    }

    #[test]
    fn test_block_without_path_fails() {
        let format = SearchReplaceFormat::new();
        let content = "<<<<<<< SEARCH\nfoo\n=======\nbar\n>>>>>>> REPLACE\n";
        assert!(matches!(
            format.parse(content),
            Err(Error::MalformedFormat(_))
        ));
    }

    #[test]
    fn test_unterminated_block_fails() {
        let format = SearchReplaceFormat::new();
        let content = "src/x.rs\n<<<<<<< SEARCH\nfoo\n=======\nbar\n";
        assert!(format.parse(content).is_err());
    }

    #[test]
    fn test_round_trip() {
        let format = SearchReplaceFormat::new();
        let edits = vec![
            FileEdit::search_replace("src/a.rs", "old_name", "new_name"),
            FileEdit::search_replace("src/b.rs", "fn f() {\n    1\n}", "fn f() {\n    2\n}"),
        ];

        let rendered = format.format(&edits).unwrap();
        let parsed = format.parse(&rendered).unwrap();
        assert_eq!(parsed, edits);
    }
}
