//! End-to-end tests: detect, parse and apply agent-produced edits

use edit_engine::{EditApplier, FileEdit, FormatRegistry, FormatType};
use tempfile::TempDir;

async fn write(root: &TempDir, name: &str, content: &str) {
    tokio::fs::write(root.path().join(name), content).await.unwrap();
}

async fn read(root: &TempDir, name: &str) -> String {
    tokio::fs::read_to_string(root.path().join(name)).await.unwrap()
}

#[tokio::test]
async fn detect_parse_apply_search_replace() {
    let root = TempDir::new().unwrap();
    write(&root, "config.toml", "workers = 2\nretries = 1\n").await;

    let registry = FormatRegistry::with_builtins();
    let payload = "\
config.toml
<<<<<<< SEARCH
workers = 2
=======
workers = 8
>>>>>>> REPLACE
";

    let (format_type, edits) = registry.parse_with_auto_detect(payload).unwrap();
    assert_eq!(format_type, FormatType::SearchReplace);

    let applier = EditApplier::new(root.path());
    applier.apply(&edits).await.unwrap();
    assert_eq!(read(&root, "config.toml").await, "workers = 8\nretries = 1\n");
}

#[tokio::test]
async fn detect_parse_apply_unified_diff() {
    let root = TempDir::new().unwrap();
    write(&root, "main.rs", "fn main() {\n    println!(\"41\");\n}\n").await;

    let registry = FormatRegistry::with_builtins();
    let payload = "\
--- a/main.rs
+++ b/main.rs
@@ -1,3 +1,3 @@
 fn main() {
-    println!(\"41\");
+    println!(\"42\");
 }
";

    let (format_type, edits) = registry.parse_with_auto_detect(payload).unwrap();
    assert_eq!(format_type, FormatType::Diff);

    EditApplier::new(root.path()).apply(&edits).await.unwrap();
    assert_eq!(
        read(&root, "main.rs").await,
        "fn main() {\n    println!(\"42\");\n}\n"
    );
}

#[tokio::test]
async fn detect_parse_apply_whole_file() {
    let root = TempDir::new().unwrap();
    write(&root, "lib.rs", "old contents\n").await;

    let registry = FormatRegistry::with_builtins();
    let payload = "File: lib.rs\n```rust\npub fn fresh() {}\n```\n";

    let (format_type, edits) = registry.parse_with_auto_detect(payload).unwrap();
    assert_eq!(format_type, FormatType::Whole);

    EditApplier::new(root.path()).apply(&edits).await.unwrap();
    assert_eq!(read(&root, "lib.rs").await, "pub fn fresh() {}");
}

#[tokio::test]
async fn architect_directives_create_and_move() {
    let root = TempDir::new().unwrap();
    write(&root, "notes.md", "# notes\n").await;

    let registry = FormatRegistry::with_builtins();
    let payload = "\
CREATE FILE: src/metrics.rs
```rust
pub fn record() {}
```

MOVE FILE: notes.md -> docs/notes.md
";

    let (format_type, edits) = registry.parse_with_auto_detect(payload).unwrap();
    assert_eq!(format_type, FormatType::Architect);

    EditApplier::new(root.path()).apply(&edits).await.unwrap();
    assert_eq!(read(&root, "src/metrics.rs").await, "pub fn record() {}");
    assert!(!root.path().join("notes.md").exists());
    assert_eq!(read(&root, "docs/notes.md").await, "# notes\n");
}

#[tokio::test]
async fn ask_entries_apply_as_pure_annotations() {
    let root = TempDir::new().unwrap();
    write(&root, "keep.txt", "untouched").await;

    let registry = FormatRegistry::with_builtins();
    let payload = "QUESTION: Should keep.txt be split?\nCONFIRM: Proceed?\n";

    let (format_type, edits) = registry.parse_with_auto_detect(payload).unwrap();
    assert_eq!(format_type, FormatType::Ask);

    let report = EditApplier::new(root.path()).apply(&edits).await.unwrap();
    assert!(report.changed_files.is_empty());
    assert_eq!(report.annotations.len(), 2);
    assert_eq!(read(&root, "keep.txt").await, "untouched");
}

#[tokio::test]
async fn failed_batch_leaves_disk_identical() {
    let root = TempDir::new().unwrap();
    write(&root, "a.txt", "foo bar foo").await;

    let applier = EditApplier::new(root.path());
    let batch = vec![
        FileEdit::search_replace("a.txt", "foo", "BAZ").with_count(-1),
        FileEdit::search_replace("a.txt", "XYZ-missing", "Q").with_count(1),
    ];

    assert!(applier.apply(&batch).await.is_err());
    assert_eq!(read(&root, "a.txt").await, "foo bar foo");
}

#[test]
fn every_builtin_round_trips_its_template() {
    // Each format's prompt template must be parseable by the format itself
    let registry = FormatRegistry::with_builtins();
    for format in registry.list() {
        let template = format.prompt_template();
        assert!(
            format.can_handle(template),
            "{} does not recognize its own template",
            format.name()
        );
        assert!(
            format.validate(template).is_ok(),
            "{} cannot parse its own template",
            format.name()
        );
    }
}
