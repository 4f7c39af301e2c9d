//! The edit format trait and the format registry
//!
//! Formats are capability-bearing plugins: each knows how to recognize,
//! parse, render and validate its own textual grammar. The registry
//! dispatches on format type or sniffs content with first-match-wins
//! detection; there is no central switch to extend.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::edit::FileEdit;
use crate::error::{Error, Result};

/// Identifier of a registered edit format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatType {
    /// Whole-file replacement
    Whole,
    /// Unified diff
    Diff,
    /// Search and replace blocks
    SearchReplace,
    /// Line-based editor operations
    Editor,
    /// High-level file directives
    Architect,
    /// Clarification requests; never mutates
    Ask,
}

/// A textual grammar for expressing file edits
pub trait EditFormat: Send + Sync {
    /// Which format this is
    fn format_type(&self) -> FormatType;

    /// Short human-readable name
    fn name(&self) -> &str;

    /// One-line description of the grammar
    fn description(&self) -> &str;

    /// Whether this format recognizes the content
    fn can_handle(&self, content: &str) -> bool;

    /// Parse content into file edits
    fn parse(&self, content: &str) -> Result<Vec<FileEdit>>;

    /// Render file edits in this format's canonical syntax
    fn format(&self, edits: &[FileEdit]) -> Result<String>;

    /// Canonical example defining the accepted syntax
    fn prompt_template(&self) -> &str;

    /// Check content without materializing the edits
    fn validate(&self, content: &str) -> Result<()> {
        self.parse(content).map(|_| ())
    }
}

/// Registry of edit formats, unique by [`FormatType`]
pub struct FormatRegistry {
    formats: Vec<Arc<dyn EditFormat>>,
    by_type: HashMap<FormatType, usize>,
}

impl FormatRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            formats: Vec::new(),
            by_type: HashMap::new(),
        }
    }

    /// Create a registry with every built-in format registered
    ///
    /// Registration order is detection order: formats with the most
    /// distinctive markers come first so sniffing cannot misfire.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .register(Arc::new(crate::formats::DiffFormat::new()))
            .expect("empty registry accepts builtins");
        registry
            .register(Arc::new(crate::formats::SearchReplaceFormat::new()))
            .expect("empty registry accepts builtins");
        registry
            .register(Arc::new(crate::formats::EditorFormat::new()))
            .expect("empty registry accepts builtins");
        registry
            .register(Arc::new(crate::formats::ArchitectFormat::new()))
            .expect("empty registry accepts builtins");
        registry
            .register(Arc::new(crate::formats::AskFormat::new()))
            .expect("empty registry accepts builtins");
        registry
            .register(Arc::new(crate::formats::WholeFileFormat::new()))
            .expect("empty registry accepts builtins");
        registry
    }

    /// Register a format; its type must be unused
    pub fn register(&mut self, format: Arc<dyn EditFormat>) -> Result<()> {
        let format_type = format.format_type();
        if self.by_type.contains_key(&format_type) {
            return Err(Error::FormatExists(format_type));
        }
        self.by_type.insert(format_type, self.formats.len());
        self.formats.push(format);
        Ok(())
    }

    /// Get a format by type
    pub fn get(&self, format_type: FormatType) -> Option<Arc<dyn EditFormat>> {
        self.by_type
            .get(&format_type)
            .map(|&index| self.formats[index].clone())
    }

    /// Registered formats in registration order
    pub fn list(&self) -> Vec<Arc<dyn EditFormat>> {
        self.formats.clone()
    }

    /// First registered format whose `can_handle` accepts the content
    pub fn detect_format(&self, content: &str) -> Option<Arc<dyn EditFormat>> {
        let found = self.formats.iter().find(|f| f.can_handle(content)).cloned();
        if let Some(format) = &found {
            debug!("Detected edit format: {}", format.name());
        }
        found
    }

    /// Parse with an explicitly chosen format
    pub fn parse_with_format(
        &self,
        format_type: FormatType,
        content: &str,
    ) -> Result<Vec<FileEdit>> {
        let format = self
            .get(format_type)
            .ok_or(Error::FormatNotFound(format_type))?;
        format.parse(content)
    }

    /// Detect the format, then parse
    pub fn parse_with_auto_detect(&self, content: &str) -> Result<(FormatType, Vec<FileEdit>)> {
        let format = self.detect_format(content).ok_or_else(|| {
            Error::MalformedFormat("no registered format recognizes this content".to_string())
        })?;
        let edits = format.parse(content)?;
        Ok((format.format_type(), edits))
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubFormat {
        marker: &'static str,
    }

    impl EditFormat for StubFormat {
        fn format_type(&self) -> FormatType {
            FormatType::Whole
        }
        fn name(&self) -> &str {
            "stub"
        }
        fn description(&self) -> &str {
            "test stub"
        }
        fn can_handle(&self, content: &str) -> bool {
            content.contains(self.marker)
        }
        fn parse(&self, _content: &str) -> Result<Vec<FileEdit>> {
            Ok(vec![])
        }
        fn format(&self, _edits: &[FileEdit]) -> Result<String> {
            Ok(String::new())
        }
        fn prompt_template(&self) -> &str {
            "STUB"
        }
    }

    #[test]
    fn test_register_unique_by_type() {
        let mut registry = FormatRegistry::new();
        registry.register(Arc::new(StubFormat { marker: "x" })).unwrap();

        let result = registry.register(Arc::new(StubFormat { marker: "y" }));
        assert!(matches!(result, Err(Error::FormatExists(FormatType::Whole))));
    }

    #[test]
    fn test_get_and_missing() {
        let mut registry = FormatRegistry::new();
        registry.register(Arc::new(StubFormat { marker: "x" })).unwrap();

        assert!(registry.get(FormatType::Whole).is_some());
        assert!(registry.get(FormatType::Diff).is_none());
        assert!(matches!(
            registry.parse_with_format(FormatType::Diff, ""),
            Err(Error::FormatNotFound(FormatType::Diff))
        ));
    }

    #[test]
    fn test_detection_first_match_wins() {
        let registry = FormatRegistry::with_builtins();

        let diff = "--- a/src/lib.rs\n+++ b/src/lib.rs\n@@ -1,1 +1,1 @@\n-a\n+b\n";
        assert_eq!(
            registry.detect_format(diff).unwrap().format_type(),
            FormatType::Diff
        );

        assert!(registry.detect_format("plain prose, no edits").is_none());
        assert!(registry.parse_with_auto_detect("plain prose").is_err());
    }

    #[test]
    fn test_builtins_all_registered() {
        let registry = FormatRegistry::with_builtins();
        for format_type in [
            FormatType::Whole,
            FormatType::Diff,
            FormatType::SearchReplace,
            FormatType::Editor,
            FormatType::Architect,
            FormatType::Ask,
        ] {
            let format = registry.get(format_type).unwrap();
            assert!(!format.name().is_empty());
            assert!(!format.prompt_template().is_empty());
        }
    }
}
