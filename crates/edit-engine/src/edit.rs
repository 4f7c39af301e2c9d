//! The file edit model shared by every format

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};

/// What an edit does to its target file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditOperation {
    /// Create a new file
    Create,
    /// Mutate an existing file
    Update,
    /// Remove a file
    Delete,
    /// Move a file to `metadata["new_path"]`
    Rename,
}

/// One structured change to one file
///
/// Different formats populate different field subsets: whole-file
/// replacement fills `new_content`, search-replace fills
/// `search_pattern`/`replace_with`, line-based edits fill `line_number`
/// and `line_count`. The ask format produces annotation-only records
/// with an empty path and the proposal carried in `metadata`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileEdit {
    /// Target file path; empty only for annotation-only records
    pub file_path: String,

    /// What the edit does
    pub operation: EditOperation,

    /// Prior content, when the format captures it
    pub old_content: Option<String>,

    /// Replacement or created content
    pub new_content: Option<String>,

    /// Text or regex to search for
    pub search_pattern: Option<String>,

    /// Replacement for `search_pattern` matches
    pub replace_with: Option<String>,

    /// 1-based line the edit anchors to
    pub line_number: Option<usize>,

    /// Number of lines covered, for ranged line operations
    pub line_count: Option<usize>,

    /// Format-specific annotations (`new_path`, `count`, `regex`, ...)
    pub metadata: HashMap<String, String>,
}

impl Default for EditOperation {
    fn default() -> Self {
        EditOperation::Update
    }
}

impl FileEdit {
    /// An edit creating `path` with `content`
    pub fn create(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            file_path: path.into(),
            operation: EditOperation::Create,
            new_content: Some(content.into()),
            ..Default::default()
        }
    }

    /// An edit replacing the whole contents of `path`
    pub fn update(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            file_path: path.into(),
            operation: EditOperation::Update,
            new_content: Some(content.into()),
            ..Default::default()
        }
    }

    /// An edit deleting `path`
    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            file_path: path.into(),
            operation: EditOperation::Delete,
            ..Default::default()
        }
    }

    /// An edit renaming `path` to `new_path`
    pub fn rename(path: impl Into<String>, new_path: impl Into<String>) -> Self {
        let mut edit = Self {
            file_path: path.into(),
            operation: EditOperation::Rename,
            ..Default::default()
        };
        edit.metadata
            .insert("new_path".to_string(), new_path.into());
        edit
    }

    /// A search-replace edit on `path`
    pub fn search_replace(
        path: impl Into<String>,
        pattern: impl Into<String>,
        replacement: impl Into<String>,
    ) -> Self {
        Self {
            file_path: path.into(),
            operation: EditOperation::Update,
            search_pattern: Some(pattern.into()),
            replace_with: Some(replacement.into()),
            ..Default::default()
        }
    }

    /// Cap the number of replacements; `-1` replaces every match
    pub fn with_count(mut self, count: i64) -> Self {
        self.metadata.insert("count".to_string(), count.to_string());
        self
    }

    /// Treat the search pattern as a regular expression
    pub fn with_regex(mut self) -> Self {
        self.metadata.insert("regex".to_string(), "true".to_string());
        self
    }

    /// Maximum replacements for search-replace; `-1` means all
    pub fn replace_count(&self) -> i64 {
        self.metadata
            .get("count")
            .and_then(|s| s.parse().ok())
            .unwrap_or(-1)
    }

    /// Whether the search pattern is a regex
    pub fn is_regex(&self) -> bool {
        self.metadata.get("regex").map(|s| s == "true").unwrap_or(false)
    }

    /// Rename target, when this is a rename
    pub fn new_path(&self) -> Option<&str> {
        self.metadata.get("new_path").map(|s| s.as_str())
    }

    /// Whether this record only annotates and never touches disk
    pub fn is_annotation(&self) -> bool {
        self.file_path.is_empty()
            && self.new_content.is_none()
            && self.search_pattern.is_none()
            && self.line_number.is_none()
    }

    /// Check operation-specific structural invariants
    pub fn validate(&self) -> Result<()> {
        if self.file_path.is_empty() && !self.is_annotation() {
            return Err(Error::InvalidEdit(
                "edit with content must name a file".to_string(),
            ));
        }

        match self.operation {
            EditOperation::Create => {
                if self.new_content.is_none() {
                    return Err(Error::InvalidEdit(format!(
                        "create of '{}' carries no content",
                        self.file_path
                    )));
                }
            }
            EditOperation::Delete => {
                if self.new_content.is_some() || self.old_content.is_some() {
                    return Err(Error::InvalidEdit(format!(
                        "delete of '{}' must not carry content",
                        self.file_path
                    )));
                }
            }
            EditOperation::Rename => {
                if self.new_path().map(|p| p.is_empty()).unwrap_or(true) {
                    return Err(Error::InvalidEdit(format!(
                        "rename of '{}' requires metadata new_path",
                        self.file_path
                    )));
                }
            }
            // Updates permit any body shape
            EditOperation::Update => {}
        }

        if let Some(pattern) = &self.search_pattern {
            if pattern.is_empty() {
                return Err(Error::InvalidEdit(
                    "empty search pattern".to_string(),
                ));
            }
        }

        if let Some(0) = self.line_number {
            return Err(Error::InvalidEdit(
                "line numbers are 1-based".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_constructors() {
        assert!(FileEdit::create("a.rs", "fn main() {}").validate().is_ok());
        assert!(FileEdit::update("a.rs", "fn main() {}").validate().is_ok());
        assert!(FileEdit::delete("a.rs").validate().is_ok());
        assert!(FileEdit::rename("a.rs", "b.rs").validate().is_ok());
        assert!(FileEdit::search_replace("a.rs", "foo", "bar").validate().is_ok());
    }

    #[test]
    fn test_rename_requires_new_path() {
        let mut edit = FileEdit::rename("a.rs", "b.rs");
        edit.metadata.remove("new_path");
        assert!(edit.validate().is_err());
    }

    #[test]
    fn test_delete_refuses_content() {
        let mut edit = FileEdit::delete("a.rs");
        edit.new_content = Some("stray".to_string());
        assert!(edit.validate().is_err());
    }

    #[test]
    fn test_empty_search_pattern_rejected() {
        let edit = FileEdit::search_replace("a.rs", "", "bar");
        assert!(edit.validate().is_err());
    }

    #[test]
    fn test_count_and_regex_accessors() {
        let edit = FileEdit::search_replace("a.rs", "foo", "bar");
        assert_eq!(edit.replace_count(), -1);
        assert!(!edit.is_regex());

        let capped = FileEdit::search_replace("a.rs", "foo", "bar")
            .with_count(2)
            .with_regex();
        assert_eq!(capped.replace_count(), 2);
        assert!(capped.is_regex());
    }

    #[test]
    fn test_line_numbers_one_based() {
        let mut edit = FileEdit::update("a.rs", "x");
        edit.line_number = Some(0);
        assert!(edit.validate().is_err());
        edit.line_number = Some(1);
        assert!(edit.validate().is_ok());
    }

    #[test]
    fn test_annotation_records() {
        let mut note = FileEdit::default();
        note.metadata
            .insert("ask_type".to_string(), "question".to_string());
        assert!(note.is_annotation());
        assert!(note.validate().is_ok());
    }
}
