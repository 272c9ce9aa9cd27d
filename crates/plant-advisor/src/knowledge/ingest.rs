//! Document loading
//!
//! Turns uploaded or on-disk files into plain text. Plain text and Markdown
//! pass through; JSON and JSON Lines contribute their `text`/`content`
//! fields (or string values) as paragraphs.

use std::path::{Path, PathBuf};

use serde_json::Value;
use walkdir::WalkDir;

use crate::error::{AdvisorError, Result};

pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["txt", "md", "json", "jsonl"];

/// Lowercased extension if it is one we can load
pub fn supported_extension(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .filter(|e| SUPPORTED_EXTENSIONS.contains(&e.as_str()))
}

/// Extract the indexable text from a file's contents
pub fn extract_text(file_name: &str, content: &str) -> Result<String> {
    let extension = supported_extension(file_name)
        .ok_or_else(|| AdvisorError::UnsupportedFile(file_name.to_string()))?;

    match extension.as_str() {
        "json" => {
            let value: Value = serde_json::from_str(content)?;
            let mut paragraphs = Vec::new();
            collect_text(&value, &mut paragraphs);
            Ok(paragraphs.join("\n\n"))
        }
        "jsonl" => {
            let mut paragraphs = Vec::new();
            for line in content.lines().filter(|l| !l.trim().is_empty()) {
                let value: Value = serde_json::from_str(line)?;
                collect_text(&value, &mut paragraphs);
            }
            Ok(paragraphs.join("\n\n"))
        }
        _ => Ok(content.to_string()),
    }
}

fn collect_text(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) if !s.trim().is_empty() => out.push(s.trim().to_string()),
        Value::Array(items) => items.iter().for_each(|item| collect_text(item, out)),
        Value::Object(map) => {
            let preferred = ["text", "content", "body"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str));
            match preferred {
                Some(text) if !text.trim().is_empty() => out.push(text.trim().to_string()),
                _ => map.values().for_each(|v| collect_text(v, out)),
            }
        }
        _ => {}
    }
}

/// `{stem}_{8 hex chars}`, unique per ingestion
pub fn document_id(file_name: &str) -> String {
    let stem: String = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("document")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{stem}_{}", &suffix[..8])
}

/// Loadable files under `dir`, in path order
pub fn discover(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable knowledge path");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| !name.starts_with('.') && supported_extension(name).is_some())
        })
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(extract_text("care.MD", "# Basil\n\nPinch flowers.").unwrap(), "# Basil\n\nPinch flowers.");
        assert!(matches!(extract_text("scan.pdf", "%PDF"), Err(AdvisorError::UnsupportedFile(_))));
    }

    #[test]
    fn test_json_fields_become_paragraphs() {
        let json = r#"[{"title": "Tomato", "text": "Feed weekly."}, {"content": "Stake early."}, "Mulch."]"#;
        assert_eq!(extract_text("tips.json", json).unwrap(), "Feed weekly.\n\nStake early.\n\nMulch.");

        let jsonl = "{\"text\": \"Water deeply.\"}\n\n{\"text\": \"Prune suckers.\"}\n";
        assert_eq!(extract_text("tips.jsonl", jsonl).unwrap(), "Water deeply.\n\nPrune suckers.");

        assert!(matches!(extract_text("bad.json", "{"), Err(AdvisorError::Serialization(_))));
    }

    #[test]
    fn test_document_ids() {
        let id = document_id("Tomato Guide (2024).md");
        assert!(id.starts_with("Tomato_Guide__2024__"));
        assert_eq!(id.len(), "Tomato_Guide__2024_".len() + 9);
        assert_ne!(document_id("a.md"), document_id("a.md"));
    }

    #[test]
    fn test_discover_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("b.md"), "b").unwrap();
        std::fs::write(dir.path().join("nested/a.txt"), "a").unwrap();
        std::fs::write(dir.path().join("image.png"), [0u8; 4]).unwrap();
        std::fs::write(dir.path().join(".hidden.md"), "h").unwrap();

        let names: Vec<String> = discover(dir.path())
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["b.md".to_string(), format!("nested{}a.txt", std::path::MAIN_SEPARATOR)]);
    }
}
