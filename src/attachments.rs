//! Cell attachments: binary assets embedded in a cell as base64.
//!
//! Each key maps to exactly one MIME type and payload. On disk this is the
//! nbformat shape `{"key": {"image/png": "<base64>"}}`.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

/// Characters `encodeURI` escapes, plus parentheses so that a key never
/// terminates a Markdown link destination early.
const KEY_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}')
    .add(b'(')
    .add(b')');

const DEFAULT_BLOB_TYPE: &str = "application/octet-stream";

// ============================================================================
// Attachment
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct Attachment {
    pub mime_type: String,
    /// Base64 payload, without any `data:` prefix.
    pub data: String,
}

impl Attachment {
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

impl TryFrom<BTreeMap<String, String>> for Attachment {
    type Error = String;

    fn try_from(bundle: BTreeMap<String, String>) -> std::result::Result<Self, Self::Error> {
        if bundle.len() > 1 {
            tracing::debug!(
                mime_types = ?bundle.keys().collect::<Vec<_>>(),
                "attachment has several representations, keeping the first"
            );
        }
        bundle
            .into_iter()
            .next()
            .map(|(mime_type, data)| Attachment { mime_type, data })
            .ok_or_else(|| "attachment has no MIME bundle".to_string())
    }
}

impl From<Attachment> for BTreeMap<String, String> {
    fn from(attachment: Attachment) -> Self {
        BTreeMap::from([(attachment.mime_type, attachment.data)])
    }
}

// ============================================================================
// Attachment Store
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttachmentStore {
    entries: BTreeMap<String, Attachment>,
}

impl AttachmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `data` under `key`, replacing whatever was there.
    pub fn add(&mut self, key: impl Into<String>, mime_type: impl Into<String>, data: impl Into<String>) {
        self.entries.insert(
            key.into(),
            Attachment {
                mime_type: mime_type.into(),
                data: data.into(),
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<&Attachment> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Copy of the store holding only the keys in `used`.
    pub fn retain_referenced(&self, used: &BTreeSet<String>) -> AttachmentStore {
        AttachmentStore {
            entries: self
                .entries
                .iter()
                .filter(|(key, _)| used.contains(*key))
                .map(|(key, att)| (key.clone(), att.clone()))
                .collect(),
        }
    }
}

// ============================================================================
// Blobs (pasted or dropped binary data)
// ============================================================================

/// Binary data handed to a cell by paste or drag-and-drop.
///
/// Dropped files carry a name; pasted clipboard data usually does not.
pub struct Blob<R> {
    pub name: Option<String>,
    pub mime_type: String,
    pub reader: R,
}

impl<R: AsyncRead + Unpin> Blob<R> {
    pub fn new(name: Option<String>, mime_type: impl Into<String>, reader: R) -> Self {
        Self {
            name,
            mime_type: mime_type.into(),
            reader,
        }
    }

    /// Read the whole blob into a base64 data URI.
    ///
    /// The URI carries the MIME essence of the declared type: lowercased,
    /// without parameters, `application/octet-stream` when empty.
    pub async fn read_as_data_uri(&mut self) -> Result<String> {
        let mut bytes = Vec::new();
        self.reader.read_to_end(&mut bytes).await?;
        Ok(encode_data_uri(&mime_essence(&self.mime_type), &bytes))
    }
}

pub fn mime_essence(mime_type: &str) -> String {
    let essence = mime_type.split(';').next().unwrap_or_default().trim();
    if essence.is_empty() {
        DEFAULT_BLOB_TYPE.to_string()
    } else {
        essence.to_ascii_lowercase()
    }
}

/// Key for a new attachment: the URI-encoded file name, or `_auto_N` where N
/// is the number of attachments already in the cell.
pub fn attachment_key(name: Option<&str>, existing: usize) -> String {
    match name {
        Some(name) => encode_uri_and_parens(name),
        None => format!("_auto_{}", existing),
    }
}

pub fn encode_uri_and_parens(value: &str) -> String {
    utf8_percent_encode(value, KEY_ENCODE_SET).to_string()
}

pub fn encode_data_uri(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, STANDARD.encode(bytes))
}

/// Split `data:<mime>;base64,<payload>` into its MIME type and payload.
pub fn parse_b64_data_uri(uri: &str) -> Result<(String, String)> {
    let rest = uri.strip_prefix("data:").ok_or(Error::InvalidDataUri)?;
    let (header, payload) = rest.split_once(',').ok_or(Error::InvalidDataUri)?;
    let mime = header.strip_suffix(";base64").ok_or(Error::InvalidDataUri)?;
    Ok((mime.to_string(), payload.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_write_wins() {
        let mut store = AttachmentStore::new();
        store.add("a.png", "image/png", "AAAA");
        store.add("a.png", "image/jpeg", "BBBB");
        assert_eq!(store.len(), 1);
        let att = store.get("a.png").unwrap();
        assert_eq!(att.mime_type, "image/jpeg");
        assert_eq!(att.data, "BBBB");
    }

    #[test]
    fn test_store_json_shape() {
        let mut store = AttachmentStore::new();
        store.add("img.png", "image/png", "iVBO");
        let json = serde_json::to_value(&store).unwrap();
        assert_eq!(json, serde_json::json!({"img.png": {"image/png": "iVBO"}}));

        let back: AttachmentStore = serde_json::from_value(json).unwrap();
        assert_eq!(back, store);
    }

    #[test]
    fn test_empty_bundle_rejected() {
        let result: std::result::Result<AttachmentStore, _> =
            serde_json::from_str(r#"{"img.png": {}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_auto_keys_follow_count() {
        assert_eq!(attachment_key(None, 0), "_auto_0");
        assert_eq!(attachment_key(None, 1), "_auto_1");
    }

    #[test]
    fn test_named_keys_are_encoded() {
        assert_eq!(
            attachment_key(Some("my shot (1).png"), 5),
            "my%20shot%20%281%29.png"
        );
        assert_eq!(attachment_key(Some("plain.png"), 0), "plain.png");
    }

    #[test]
    fn test_data_uri_parse() {
        let uri = encode_data_uri("image/png", b"\x89PNG");
        let (mime, payload) = parse_b64_data_uri(&uri).unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(STANDARD.decode(payload).unwrap(), b"\x89PNG");
        assert!(parse_b64_data_uri("image/png;base64,AAAA").is_err());
        assert!(parse_b64_data_uri("data:image/png,AAAA").is_err());
    }

    #[test]
    fn test_retain_referenced() {
        let mut store = AttachmentStore::new();
        store.add("a", "image/png", "A");
        store.add("b", "image/png", "B");
        let used = BTreeSet::from(["b".to_string(), "missing".to_string()]);
        let kept = store.retain_referenced(&used);
        assert_eq!(kept.keys().collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_blob_without_type_reads_as_octet_stream() {
        let mut blob = Blob::new(None, "", &b"xyz"[..]);
        let uri = blob.read_as_data_uri().await.unwrap();
        assert!(uri.starts_with("data:application/octet-stream;base64,"));
    }

    #[test]
    fn test_mime_essence() {
        assert_eq!(mime_essence("image/png"), "image/png");
        assert_eq!(mime_essence("Image/SVG+XML; charset=utf-8"), "image/svg+xml");
        assert_eq!(mime_essence("  "), "application/octet-stream");
    }
}
