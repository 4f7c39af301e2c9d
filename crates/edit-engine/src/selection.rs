//! Advisory format selection for callers
//!
//! The engine itself never chooses a format; this helper encodes the
//! policy producers consult when building prompts: small files patch
//! well with diffs, large files are cheapest to replace wholesale, and
//! some models have a known-good preferred format.

use std::collections::HashMap;

use crate::format::FormatType;

/// File size under which a diff is the best fit
const SMALL_FILE_BYTES: usize = 4 * 1024;

/// File size above which whole-file replacement wins
const LARGE_FILE_BYTES: usize = 100 * 1024;

/// Size- and model-based format suggestions
pub struct FormatSelector {
    /// Preferred format by model-name fragment
    model_preferences: HashMap<String, FormatType>,
}

impl FormatSelector {
    /// Create a selector with the default model preference table
    pub fn new() -> Self {
        let mut model_preferences = HashMap::new();
        model_preferences.insert("gpt-4".to_string(), FormatType::Diff);
        model_preferences.insert("o3".to_string(), FormatType::Diff);
        model_preferences.insert("claude".to_string(), FormatType::SearchReplace);
        Self { model_preferences }
    }

    /// Create a selector with an explicit preference table
    pub fn with_preferences(model_preferences: HashMap<String, FormatType>) -> Self {
        Self { model_preferences }
    }

    /// Override or add a model preference
    pub fn set_preference(&mut self, model_fragment: impl Into<String>, format: FormatType) {
        self.model_preferences.insert(model_fragment.into(), format);
    }

    /// Suggest a format for a file of `file_size` bytes edited by `model`
    ///
    /// A model preference wins outright; otherwise the size heuristic
    /// applies: small files prefer diffs, large files whole-file
    /// replacement, everything in between search-replace.
    pub fn suggest(&self, model: Option<&str>, file_size: usize) -> FormatType {
        if let Some(model) = model {
            let model = model.to_ascii_lowercase();
            if let Some(&preferred) = self
                .model_preferences
                .iter()
                .find(|(fragment, _)| model.contains(fragment.as_str()))
                .map(|(_, format)| format)
            {
                return preferred;
            }
        }

        if file_size > LARGE_FILE_BYTES {
            FormatType::Whole
        } else if file_size <= SMALL_FILE_BYTES {
            FormatType::Diff
        } else {
            FormatType::SearchReplace
        }
    }
}

impl Default for FormatSelector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_heuristic() {
        let selector = FormatSelector::new();
        assert_eq!(selector.suggest(None, 1024), FormatType::Diff);
        assert_eq!(selector.suggest(None, 50 * 1024), FormatType::SearchReplace);
        assert_eq!(selector.suggest(None, 200 * 1024), FormatType::Whole);
    }

    #[test]
    fn test_model_preference_wins() {
        let selector = FormatSelector::new();
        assert_eq!(
            selector.suggest(Some("claude-sonnet"), 200 * 1024),
            FormatType::SearchReplace
        );
        assert_eq!(selector.suggest(Some("gpt-4o"), 50 * 1024), FormatType::Diff);
    }

    #[test]
    fn test_unknown_model_falls_back_to_size() {
        let selector = FormatSelector::new();
        assert_eq!(
            selector.suggest(Some("mystery-model"), 1024),
            FormatType::Diff
        );
    }

    #[test]
    fn test_custom_preference() {
        let mut selector = FormatSelector::new();
        selector.set_preference("local-llama", FormatType::Editor);
        assert_eq!(
            selector.suggest(Some("local-llama-70b"), 1024),
            FormatType::Editor
        );
    }
}
