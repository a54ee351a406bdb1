//! Data models for notebook cells and the contents service.
//!
//! These are the persisted shapes: a cell as it appears inside an `.ipynb`
//! file, the notebook document around it, and the contents model returned
//! by the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::attachments::AttachmentStore;

// ============================================================================
// Cell Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    Code,
    Markdown,
    Raw,
    /// Deprecated: heading cells are converted to markdown on load.
    Heading,
}

impl CellType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CellType::Code => "code",
            CellType::Markdown => "markdown",
            CellType::Raw => "raw",
            CellType::Heading => "heading",
        }
    }

    pub fn parse(value: &str) -> Option<CellType> {
        match value {
            "code" => Some(CellType::Code),
            "markdown" => Some(CellType::Markdown),
            "raw" => Some(CellType::Raw),
            "heading" => Some(CellType::Heading),
            _ => None,
        }
    }
}

impl fmt::Display for CellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Persisted Cell
// ============================================================================

/// A cell as stored in a notebook file.
///
/// `source` and `attachments` are optional on input; a cell only adopts the
/// fields that are present. `rendered` is the cached HTML some front ends
/// store next to markdown sources; it is read but never written back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellData {
    pub cell_type: CellType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_source",
        skip_serializing_if = "Option::is_none"
    )]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendered: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<AttachmentStore>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_count: Option<Value>,
    /// Level of a legacy heading cell.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<usize>,
}

impl CellData {
    pub fn new(cell_type: CellType, source: impl Into<String>) -> Self {
        Self {
            cell_type,
            id: None,
            source: Some(source.into()),
            rendered: None,
            metadata: Map::new(),
            attachments: None,
            outputs: None,
            execution_count: None,
            level: None,
        }
    }
}

/// nbformat allows `source` to be either one string or a list of lines.
fn deserialize_source<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Source {
        Text(String),
        Lines(Vec<String>),
    }

    Ok(Option::<Source>::deserialize(deserializer)?.map(|source| match source {
        Source::Text(text) => text,
        Source::Lines(lines) => lines.concat(),
    }))
}

// ============================================================================
// Notebook Document
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotebookData {
    #[serde(default)]
    pub cells: Vec<CellData>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default = "default_nbformat")]
    pub nbformat: u32,
    #[serde(default = "default_nbformat_minor")]
    pub nbformat_minor: u32,
}

fn default_nbformat() -> u32 {
    4
}

fn default_nbformat_minor() -> u32 {
    5
}

impl Default for NotebookData {
    fn default() -> Self {
        Self {
            cells: Vec::new(),
            metadata: Map::new(),
            nbformat: default_nbformat(),
            nbformat_minor: default_nbformat_minor(),
        }
    }
}

// ============================================================================
// Contents Service
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Directory,
    File,
    Notebook,
}

impl ContentType {
    pub fn parse(value: &str) -> Option<ContentType> {
        match value {
            "directory" => Some(ContentType::Directory),
            "file" => Some(ContentType::File),
            "notebook" => Some(ContentType::Notebook),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentFormat {
    Json,
    Text,
    Base64,
}

impl ContentFormat {
    /// Formats a client may request explicitly; `json` is implied for notebooks.
    pub fn parse_requested(value: &str) -> Option<ContentFormat> {
        match value {
            "text" => Some(ContentFormat::Text),
            "base64" => Some(ContentFormat::Base64),
            _ => None,
        }
    }
}

/// Model describing a file, notebook or directory.
///
/// `content` and `format` are `None` when the model was requested without
/// content; see [`crate::contents::validate_model`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentsModel {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: ContentType,
    pub writable: bool,
    pub created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub mimetype: Option<String>,
    pub content: Option<Value>,
    pub format: Option<ContentFormat>,
}

/// Body of a save request.
#[derive(Debug, Clone, Deserialize)]
pub struct SaveModel {
    #[serde(rename = "type")]
    pub kind: Option<ContentType>,
    pub format: Option<ContentFormat>,
    pub content: Option<Value>,
}

/// Body of a rename request: the new path of the entry.
#[derive(Debug, Clone, Deserialize)]
pub struct RenameModel {
    pub path: String,
}

/// Body of a create request. With `copy_from` the server copies that file
/// into the target directory; otherwise it creates an untitled entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateModel {
    pub copy_from: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<ContentType>,
    #[serde(default)]
    pub ext: String,
}

// ============================================================================
// Version History
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionEntry {
    pub commit_id: String,
    pub commit_time: DateTime<Utc>,
    pub author: String,
    pub commit_message: String,
}

/// A file as it is now next to the same file at an earlier commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionDiff {
    pub file_content: String,
    pub diff_file_content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_accepts_line_list() {
        let data: CellData = serde_json::from_str(
            r##"{"cell_type": "markdown", "source": ["# Title\n", "body"]}"##,
        )
        .unwrap();
        assert_eq!(data.source.as_deref(), Some("# Title\nbody"));
    }

    #[test]
    fn test_missing_source_stays_absent() {
        let data: CellData = serde_json::from_str(r#"{"cell_type": "raw"}"#).unwrap();
        assert_eq!(data.source, None);
        assert!(data.attachments.is_none());
    }

    #[test]
    fn test_empty_optional_fields_are_omitted() {
        let json = serde_json::to_value(CellData::new(CellType::Markdown, "hi")).unwrap();
        assert_eq!(json, serde_json::json!({"cell_type": "markdown", "source": "hi"}));
    }

    #[test]
    fn test_cell_type_parse() {
        assert_eq!(CellType::parse("raw"), Some(CellType::Raw));
        assert_eq!(CellType::parse("heading"), Some(CellType::Heading));
        assert_eq!(CellType::parse("Markdown"), None);
    }
}
