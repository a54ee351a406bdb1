//! Contents service: notebooks, files and directories under one root.
//!
//! Every model handed out passes [`validate_model`]. Notebooks are loaded
//! through the cell model on save, so unused attachments are dropped before
//! anything reaches disk.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, LazyLock};
use std::time::SystemTime;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::cells::CellOptions;
use crate::error::{Error, Result};
use crate::models::{
    ContentFormat, ContentType, ContentsModel, CreateModel, NotebookData, SaveModel, VersionDiff,
    VersionEntry,
};
use crate::notebook::Notebook;
use crate::{validate_path_within, CellConfig};

const NOTEBOOK_EXTENSION: &str = "ipynb";
const LOG_FORMAT: &str = "--format=%H|%aI|%an|%s";

static COPY_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-Copy\d*$").expect("copy suffix regex"));

// ============================================================================
// Query Parameters
// ============================================================================

/// Raw query string of a contents GET, as sent by the client.
#[derive(Debug, Default, Deserialize)]
pub struct ContentsQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub format: Option<String>,
    pub content: Option<String>,
}

/// A validated contents GET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentsRequest {
    pub kind: Option<ContentType>,
    pub format: Option<ContentFormat>,
    pub content: bool,
}

impl Default for ContentsRequest {
    fn default() -> Self {
        Self {
            kind: None,
            format: None,
            content: true,
        }
    }
}

pub fn parse_contents_query(query: &ContentsQuery) -> Result<ContentsRequest> {
    let kind = match query.kind.as_deref() {
        None => None,
        Some(value) => Some(
            ContentType::parse(value)
                .ok_or_else(|| Error::BadRequest(format!("Type {:?} is invalid", value)))?,
        ),
    };
    let format = match query.format.as_deref() {
        None => None,
        Some(value) => Some(
            ContentFormat::parse_requested(value)
                .ok_or_else(|| Error::BadRequest(format!("Format {:?} is invalid", value)))?,
        ),
    };
    let content = match query.content.as_deref() {
        None | Some("1") => true,
        Some("0") => false,
        Some(value) => {
            return Err(Error::BadRequest(format!("Content {:?} is invalid", value)));
        }
    };
    Ok(ContentsRequest {
        kind,
        format,
        content,
    })
}

/// Check that `content` and `format` are filled in exactly when content
/// was asked for.
pub fn validate_model(model: &ContentsModel, expect_content: bool) -> Result<()> {
    let fields = [
        ("content", model.content.is_some()),
        ("format", model.format.is_some()),
    ];
    let wrong: Vec<&str> = fields
        .iter()
        .filter(|(_, present)| *present != expect_content)
        .map(|(name, _)| *name)
        .collect();

    if wrong.is_empty() {
        Ok(())
    } else if expect_content {
        Err(Error::InvalidModel(format!("Keys unexpectedly None: {:?}", wrong)))
    } else {
        Err(Error::InvalidModel(format!("Keys unexpectedly not None: {:?}", wrong)))
    }
}

// ============================================================================
// Contents Manager
// ============================================================================

#[derive(Debug, Clone)]
pub struct ContentsManager {
    root: PathBuf,
    cells: Arc<CellConfig>,
}

impl ContentsManager {
    pub fn new(root: &Path, cells: Arc<CellConfig>) -> Result<Self> {
        let root = fs::canonicalize(root)
            .map_err(|_| Error::NotFound(root.display().to_string()))?;
        Ok(Self { root, cells })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn api_path(path: &str) -> &str {
        path.trim_matches('/')
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let path = Self::api_path(path);
        if path.is_empty() {
            return Ok(self.root.clone());
        }
        validate_path_within(&self.root, &self.root.join(path))
    }

    fn cell_options(&self) -> CellOptions {
        CellOptions {
            config: self.cells.clone(),
            ..CellOptions::default()
        }
    }

    // ------------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------------

    pub fn get(&self, path: &str, request: &ContentsRequest) -> Result<ContentsModel> {
        let full_path = self.resolve(path)?;
        if !full_path.exists() {
            return Err(Error::NotFound(format!("No such file or directory: {}", path)));
        }

        let kind = detect_kind(&full_path, request.kind);
        match (request.kind, kind) {
            (Some(ContentType::Directory), ContentType::Directory) | (None, _) => {}
            (Some(ContentType::Directory), _) => {
                return Err(Error::BadRequest(format!("{} is not a directory", path)));
            }
            (Some(_), ContentType::Directory) => {
                return Err(Error::BadRequest(format!("{} is a directory", path)));
            }
            (Some(_), _) => {}
        }

        let mut model = self.base_model(path, &full_path, kind)?;
        if request.content {
            match kind {
                ContentType::Directory => {
                    let entries = self.list(path)?;
                    model.content = Some(serde_json::to_value(entries)?);
                    model.format = Some(ContentFormat::Json);
                }
                ContentType::Notebook => {
                    let notebook = read_notebook(&full_path)?;
                    model.content = Some(serde_json::to_value(notebook)?);
                    model.format = Some(ContentFormat::Json);
                }
                ContentType::File => {
                    let bytes = fs::read(&full_path)?;
                    let (content, format) = encode_file(bytes, request.format, path)?;
                    model.mimetype = Some(
                        match format {
                            ContentFormat::Text => "text/plain",
                            _ => "application/octet-stream",
                        }
                        .to_string(),
                    );
                    model.content = Some(Value::String(content));
                    model.format = Some(format);
                }
            }
        }

        validate_model(&model, request.content)?;
        Ok(model)
    }

    /// Models (without content) of the entries of a directory, sorted by
    /// name. Hidden entries are skipped.
    pub fn list(&self, dir: &str) -> Result<Vec<ContentsModel>> {
        let full_dir = self.resolve(dir)?;
        if !full_dir.is_dir() {
            return Err(Error::NotFound(format!("No such directory: {}", dir)));
        }
        let dir = Self::api_path(dir);

        let paths: Vec<PathBuf> = WalkDir::new(&full_dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
            .map(|e| e.path().to_path_buf())
            .collect();

        let mut models: Vec<ContentsModel> = paths
            .par_iter()
            .filter_map(|full_path| {
                let name = full_path.file_name()?.to_string_lossy().into_owned();
                let api_path = if dir.is_empty() {
                    name
                } else {
                    format!("{}/{}", dir, name)
                };
                let kind = detect_kind(full_path, None);
                self.base_model(&api_path, full_path, kind).ok()
            })
            .collect();

        models.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(models)
    }

    fn base_model(&self, path: &str, full_path: &Path, kind: ContentType) -> Result<ContentsModel> {
        let meta = fs::metadata(full_path)?;
        let last_modified = meta.modified().map(to_utc).unwrap_or_else(|_| Utc::now());
        let created = meta.created().map(to_utc).unwrap_or(last_modified);
        let path = Self::api_path(path);
        let name = path.rsplit('/').next().unwrap_or_default().to_string();

        Ok(ContentsModel {
            name,
            path: path.to_string(),
            kind,
            writable: !meta.permissions().readonly(),
            created,
            last_modified,
            mimetype: None,
            content: None,
            format: None,
        })
    }

    // ------------------------------------------------------------------------
    // Write
    // ------------------------------------------------------------------------

    /// Save a model at `path` and return the stored model without content.
    pub fn save(&self, path: &str, model: SaveModel) -> Result<ContentsModel> {
        let full_path = self.resolve(path)?;
        let kind = model
            .kind
            .ok_or_else(|| Error::BadRequest("No file type provided".to_string()))?;

        match kind {
            ContentType::Directory => {
                fs::create_dir_all(&full_path)?;
            }
            ContentType::Notebook => {
                let content = model
                    .content
                    .ok_or_else(|| Error::BadRequest("No file content provided".to_string()))?;
                let data: NotebookData = serde_json::from_value(content)?;
                let notebook = Notebook::from_json(&data, self.cell_options());
                let mut json = serde_json::to_string_pretty(&notebook.to_json(true))?;
                json.push('\n');
                fs::write(&full_path, json)?;
            }
            ContentType::File => {
                let content = model
                    .content
                    .ok_or_else(|| Error::BadRequest("No file content provided".to_string()))?;
                let text = content
                    .as_str()
                    .ok_or_else(|| Error::BadRequest("File content must be a string".to_string()))?;
                match model.format {
                    Some(ContentFormat::Text) => fs::write(&full_path, text)?,
                    Some(ContentFormat::Base64) => {
                        let bytes = STANDARD
                            .decode(text)
                            .map_err(|e| Error::BadRequest(format!("Invalid base64: {}", e)))?;
                        fs::write(&full_path, bytes)?;
                    }
                    _ => {
                        return Err(Error::BadRequest(
                            "Must specify format of file contents as 'text' or 'base64'".to_string(),
                        ));
                    }
                }
            }
        }

        info!(path = Self::api_path(path), ?kind, "saved");
        self.get(
            path,
            &ContentsRequest {
                kind: Some(kind),
                format: None,
                content: false,
            },
        )
    }

    pub fn delete(&self, path: &str) -> Result<()> {
        if Self::api_path(path).is_empty() {
            return Err(Error::BadRequest("Cannot delete the root directory".to_string()));
        }
        let full_path = self.resolve(path)?;
        if !full_path.exists() {
            return Err(Error::NotFound(format!("No such file or directory: {}", path)));
        }

        if full_path.is_dir() {
            if fs::read_dir(&full_path)?.next().is_some() {
                return Err(Error::BadRequest(format!("Directory {} not empty", path)));
            }
            fs::remove_dir(&full_path)?;
        } else {
            fs::remove_file(&full_path)?;
        }
        info!(path = Self::api_path(path), "deleted");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Create, copy and rename
    // ------------------------------------------------------------------------

    /// Create an entry inside the directory `dir`; the name is chosen here.
    ///
    /// With `copy_from` the file is copied as `name-CopyN.ext`, otherwise an
    /// empty untitled notebook, file or folder is made.
    pub fn create(&self, dir: &str, model: CreateModel) -> Result<ContentsModel> {
        let full_dir = self.resolve(dir)?;
        if full_dir.is_file() {
            return Err(Error::BadRequest("Cannot POST to files, use PUT instead.".to_string()));
        }
        if !full_dir.is_dir() {
            return Err(Error::NotFound(format!("No such directory: {}", dir)));
        }

        let (name, kind) = match model.copy_from.as_deref().filter(|from| !from.is_empty()) {
            Some(from) => self.copy_into(from, &full_dir)?,
            None => create_untitled(&full_dir, model.kind, &model.ext)?,
        };

        let dir = Self::api_path(dir);
        let path = if dir.is_empty() {
            name
        } else {
            format!("{}/{}", dir, name)
        };
        info!(path = %path, ?kind, "created");
        self.get(
            &path,
            &ContentsRequest {
                kind: Some(kind),
                format: None,
                content: false,
            },
        )
    }

    fn copy_into(&self, from: &str, full_dir: &Path) -> Result<(String, ContentType)> {
        let source = self.resolve(from)?;
        if source.is_dir() {
            return Err(Error::BadRequest(format!("Cannot copy directory {}", from)));
        }
        if !source.is_file() {
            return Err(Error::NotFound(format!("No such file: {}", from)));
        }

        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (stem, ext) = split_extension(&file_name);
        let stem = COPY_SUFFIX.replace(stem, "");
        let name = unused_name(full_dir, 1, |i| format!("{}-Copy{}{}", stem, i, ext));

        fs::copy(&source, full_dir.join(&name))?;
        debug!(from = Self::api_path(from), to = %name, "copied");
        Ok((name, detect_kind(&source, None)))
    }

    /// Move an entry to `new_path`. An existing target is never replaced.
    pub fn rename(&self, path: &str, new_path: &str) -> Result<ContentsModel> {
        let (old, new) = (Self::api_path(path), Self::api_path(new_path));
        if old.is_empty() || new.is_empty() {
            return Err(Error::BadRequest("Cannot rename the root directory".to_string()));
        }
        let from = self.resolve(old)?;
        if !from.exists() {
            return Err(Error::NotFound(format!("No such file or directory: {}", path)));
        }

        if old != new {
            let to = self.resolve(new)?;
            if to.exists() {
                return Err(Error::Conflict(format!("File already exists: {}", new)));
            }
            fs::rename(&from, &to)?;
            info!(from = old, to = new, "renamed");
        }

        self.get(
            new,
            &ContentsRequest {
                content: false,
                ..ContentsRequest::default()
            },
        )
    }

    // ------------------------------------------------------------------------
    // Version history
    // ------------------------------------------------------------------------

    /// Run git in the contents root and return its stdout.
    fn git<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()
            .map_err(|e| Error::Git(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Git(stderr.trim().to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Path of a file relative to the root, for use as a git pathspec.
    fn tracked_file<'a>(&self, path: &'a str) -> Result<&'a str> {
        let full_path = self.resolve(path)?;
        if !full_path.is_file() {
            return Err(Error::NotFound(format!("No such file: {}", path)));
        }
        Ok(Self::api_path(path))
    }

    fn head_version(&self) -> Result<VersionEntry> {
        let stdout = self.git(["log", "-1", LOG_FORMAT, "HEAD"])?;
        stdout
            .lines()
            .next()
            .and_then(parse_log_line)
            .ok_or_else(|| Error::Git("could not read the new commit".to_string()))
    }

    /// Commit the current state of a file.
    fn commit_file(&self, rel: &str, message: &str) -> Result<VersionEntry> {
        self.git(["add", "--", rel])?;
        self.git(["commit", "--allow-empty", "-m", message])?;
        self.head_version()
    }

    /// Git history of a file, newest first.
    pub fn versions(&self, path: &str) -> Result<Vec<VersionEntry>> {
        let rel = self.tracked_file(path)?;
        let stdout = self.git(["log", LOG_FORMAT, "--follow", "--", rel])?;
        let versions: Vec<VersionEntry> = stdout.lines().filter_map(parse_log_line).collect();
        debug!(path = rel, count = versions.len(), "loaded version history");
        Ok(versions)
    }

    /// Save the current state of a file as a new version.
    pub fn create_version(&self, path: &str, message: &str) -> Result<VersionEntry> {
        let rel = self.tracked_file(path)?;
        let message = message.trim();
        if message.is_empty() {
            return Err(Error::BadRequest("A commit message is required".to_string()));
        }
        let entry = self.commit_file(rel, message)?;
        info!(path = rel, commit = %entry.commit_id, "created version");
        Ok(entry)
    }

    /// The file as it is now, next to its content at `commit_id`.
    pub fn version_diff(&self, path: &str, commit_id: &str) -> Result<VersionDiff> {
        let rel = self.tracked_file(path)?;
        let commit_id = validate_commit_id(commit_id)?;
        let current = fs::read(self.resolve(rel)?)?;
        let spec = format!("{}:./{}", commit_id, rel);
        let previous = self.git(["show", spec.as_str()])?;
        Ok(VersionDiff {
            file_content: String::from_utf8_lossy(&current).into_owned(),
            diff_file_content: previous,
        })
    }

    /// Restore a file to its content at `commit_id`.
    ///
    /// The current state is committed first as a snapshot, so the reset
    /// itself can be undone; the snapshot is returned.
    pub fn reset_version(&self, path: &str, commit_id: &str) -> Result<VersionEntry> {
        let rel = self.tracked_file(path)?;
        let commit_id = validate_commit_id(commit_id)?;
        let spec = format!("{}:./{}", commit_id, rel);
        self.git(["cat-file", "-e", spec.as_str()])?;

        let message = format!("snapshot {}", Utc::now().format("%Y.%m.%d-%H.%M.%S"));
        let snapshot = self.commit_file(rel, &message)?;
        self.git(["checkout", commit_id, "--", rel])?;
        info!(path = rel, commit = commit_id, snapshot = %snapshot.commit_id, "reset to version");
        Ok(snapshot)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn detect_kind(full_path: &Path, requested: Option<ContentType>) -> ContentType {
    if full_path.is_dir() {
        ContentType::Directory
    } else if requested == Some(ContentType::File) {
        ContentType::File
    } else if full_path
        .extension()
        .map(|ext| ext == NOTEBOOK_EXTENSION)
        .unwrap_or(false)
    {
        ContentType::Notebook
    } else {
        ContentType::File
    }
}

fn create_untitled(
    full_dir: &Path,
    kind: Option<ContentType>,
    ext: &str,
) -> Result<(String, ContentType)> {
    let ext = match ext {
        "" => String::new(),
        ext if ext.starts_with('.') => ext.to_string(),
        ext => format!(".{}", ext),
    };
    let kind = kind.unwrap_or(if ext == ".ipynb" {
        ContentType::Notebook
    } else {
        ContentType::File
    });

    let (stem, sep, ext) = match kind {
        ContentType::Directory => ("Untitled Folder", " ", String::new()),
        ContentType::Notebook => ("Untitled", "", ".ipynb".to_string()),
        ContentType::File => ("untitled", "", ext),
    };
    let name = unused_name(full_dir, 0, |i| match i {
        0 => format!("{}{}", stem, ext),
        i => format!("{}{}{}{}", stem, sep, i, ext),
    });

    let full_path = full_dir.join(&name);
    match kind {
        ContentType::Directory => fs::create_dir(&full_path)?,
        ContentType::Notebook => {
            let mut json = serde_json::to_string_pretty(&NotebookData::default())?;
            json.push('\n');
            fs::write(&full_path, json)?;
        }
        ContentType::File => fs::write(&full_path, "")?,
    }
    Ok((name, kind))
}

/// First name produced by `name_for(first)`, `name_for(first + 1)`, ...
/// that is not taken in `dir`.
fn unused_name(dir: &Path, first: usize, name_for: impl Fn(usize) -> String) -> String {
    let mut i = first;
    loop {
        let name = name_for(i);
        if !dir.join(&name).exists() {
            return name;
        }
        i += 1;
    }
}

/// `("a.tar", ".gz")` for `a.tar.gz`; dotfiles have no extension.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => name.split_at(pos),
        _ => (name, ""),
    }
}

fn validate_commit_id(commit_id: &str) -> Result<&str> {
    let commit_id = commit_id.trim();
    if (4..=40).contains(&commit_id.len()) && commit_id.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(commit_id)
    } else {
        Err(Error::BadRequest(format!("Invalid commit id {:?}", commit_id)))
    }
}

fn read_notebook(full_path: &Path) -> Result<NotebookData> {
    let raw = fs::read_to_string(full_path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Text when asked for (or when it decodes as UTF-8), base64 otherwise.
fn encode_file(
    bytes: Vec<u8>,
    format: Option<ContentFormat>,
    path: &str,
) -> Result<(String, ContentFormat)> {
    match format {
        Some(ContentFormat::Base64) => Ok((STANDARD.encode(bytes), ContentFormat::Base64)),
        Some(ContentFormat::Text) => String::from_utf8(bytes)
            .map(|text| (text, ContentFormat::Text))
            .map_err(|_| Error::BadRequest(format!("{} is not UTF-8 encoded", path))),
        _ => match String::from_utf8(bytes) {
            Ok(text) => Ok((text, ContentFormat::Text)),
            Err(e) => Ok((STANDARD.encode(e.into_bytes()), ContentFormat::Base64)),
        },
    }
}

fn parse_log_line(line: &str) -> Option<VersionEntry> {
    let parts: Vec<&str> = line.splitn(4, '|').collect();
    if parts.len() != 4 {
        return None;
    }
    let commit_time = DateTime::parse_from_rfc3339(parts[1])
        .ok()?
        .with_timezone(&Utc);
    Some(VersionEntry {
        commit_id: parts[0].to_string(),
        commit_time,
        author: parts[2].to_string(),
        commit_message: parts[3].to_string(),
    })
}

fn to_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CellData, CellType};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn manager() -> (tempfile::TempDir, ContentsManager) {
        let dir = tempfile::tempdir().unwrap();
        let manager = ContentsManager::new(dir.path(), Arc::new(CellConfig::default())).unwrap();
        (dir, manager)
    }

    fn query(kind: Option<&str>, format: Option<&str>, content: Option<&str>) -> ContentsQuery {
        ContentsQuery {
            kind: kind.map(String::from),
            format: format.map(String::from),
            content: content.map(String::from),
        }
    }

    fn no_content() -> ContentsRequest {
        ContentsRequest {
            content: false,
            ..ContentsRequest::default()
        }
    }

    #[test]
    fn test_parse_query_defaults() {
        let request = parse_contents_query(&ContentsQuery::default()).unwrap();
        assert_eq!(request, ContentsRequest::default());
        assert!(request.content);
    }

    #[test]
    fn test_parse_query_rejects_bad_values() {
        for q in [
            query(Some("folder"), None, None),
            query(None, Some("json"), None),
            query(None, None, Some("2")),
        ] {
            let err = parse_contents_query(&q).unwrap_err();
            assert!(matches!(err, Error::BadRequest(_)), "{:?}", err);
        }

        let ok = parse_contents_query(&query(Some("notebook"), Some("text"), Some("0"))).unwrap();
        assert_eq!(ok.kind, Some(ContentType::Notebook));
        assert_eq!(ok.format, Some(ContentFormat::Text));
        assert!(!ok.content);
    }

    #[test]
    fn test_validate_model() {
        let (_dir, cm) = manager();
        fs::write(cm.root().join("a.txt"), "hi").unwrap();

        let mut model = cm.get("a.txt", &no_content()).unwrap();
        assert!(validate_model(&model, false).is_ok());
        assert!(matches!(validate_model(&model, true), Err(Error::InvalidModel(_))));

        model.content = Some(json!("hi"));
        assert!(matches!(validate_model(&model, false), Err(Error::InvalidModel(_))));
    }

    #[test]
    fn test_get_text_and_binary_files() {
        let (_dir, cm) = manager();
        fs::write(cm.root().join("a.txt"), "hello").unwrap();
        fs::write(cm.root().join("b.bin"), [0xffu8, 0xfe]).unwrap();

        let text = cm.get("a.txt", &ContentsRequest::default()).unwrap();
        assert_eq!(text.kind, ContentType::File);
        assert_eq!(text.content, Some(json!("hello")));
        assert_eq!(text.format, Some(ContentFormat::Text));
        assert_eq!(text.mimetype.as_deref(), Some("text/plain"));

        let bin = cm.get("b.bin", &ContentsRequest::default()).unwrap();
        assert_eq!(bin.format, Some(ContentFormat::Base64));
        assert_eq!(bin.content, Some(json!("//4=")));

        let forced = ContentsRequest {
            format: Some(ContentFormat::Text),
            ..ContentsRequest::default()
        };
        assert!(matches!(cm.get("b.bin", &forced), Err(Error::BadRequest(_))));
    }

    #[test]
    fn test_get_missing() {
        let (_dir, cm) = manager();
        assert!(matches!(
            cm.get("nope.ipynb", &ContentsRequest::default()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_path_escape_is_rejected() {
        let (_dir, cm) = manager();
        assert!(matches!(
            cm.get("../outside.txt", &ContentsRequest::default()),
            Err(Error::PathEscape(_))
        ));
    }

    #[test]
    fn test_list_directory() {
        let (_dir, cm) = manager();
        fs::create_dir(cm.root().join("sub")).unwrap();
        fs::write(cm.root().join("sub/b.ipynb"), "{}").unwrap();
        fs::write(cm.root().join("sub/a.txt"), "").unwrap();
        fs::write(cm.root().join("sub/.hidden"), "").unwrap();

        let listing = cm.list("sub").unwrap();
        let names: Vec<_> = listing.iter().map(|m| m.path.as_str()).collect();
        assert_eq!(names, vec!["sub/a.txt", "sub/b.ipynb"]);
        assert_eq!(listing[1].kind, ContentType::Notebook);
        assert!(listing.iter().all(|m| m.content.is_none()));

        let dir = cm.get("sub", &ContentsRequest::default()).unwrap();
        assert_eq!(dir.kind, ContentType::Directory);
        assert_eq!(dir.content.unwrap().as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_save_notebook_collects_attachments() {
        let (_dir, cm) = manager();
        let mut cell = CellData::new(CellType::Markdown, "![a](attachment:a.png)");
        let mut store = crate::attachments::AttachmentStore::new();
        store.add("a.png", "image/png", "AAAA");
        store.add("b.png", "image/png", "BBBB");
        cell.attachments = Some(store);
        let data = NotebookData {
            cells: vec![cell],
            ..NotebookData::default()
        };

        let saved = cm
            .save(
                "/nb.ipynb",
                SaveModel {
                    kind: Some(ContentType::Notebook),
                    format: Some(ContentFormat::Json),
                    content: Some(serde_json::to_value(&data).unwrap()),
                },
            )
            .unwrap();
        assert_eq!(saved.path, "nb.ipynb");
        assert_eq!(saved.kind, ContentType::Notebook);
        assert!(saved.content.is_none());

        let loaded = cm.get("nb.ipynb", &ContentsRequest::default()).unwrap();
        let content = loaded.content.unwrap();
        let attachments = &content["cells"][0]["attachments"];
        assert_eq!(attachments, &json!({"a.png": {"image/png": "AAAA"}}));
    }

    #[test]
    fn test_save_requires_type_and_content() {
        let (_dir, cm) = manager();
        let missing_type = SaveModel {
            kind: None,
            format: None,
            content: Some(json!("x")),
        };
        assert!(matches!(cm.save("a.txt", missing_type), Err(Error::BadRequest(_))));

        let missing_content = SaveModel {
            kind: Some(ContentType::File),
            format: Some(ContentFormat::Text),
            content: None,
        };
        assert!(matches!(cm.save("a.txt", missing_content), Err(Error::BadRequest(_))));
    }

    #[test]
    fn test_save_base64_file() {
        let (_dir, cm) = manager();
        cm.save(
            "raw.bin",
            SaveModel {
                kind: Some(ContentType::File),
                format: Some(ContentFormat::Base64),
                content: Some(json!("AQID")),
            },
        )
        .unwrap();
        assert_eq!(fs::read(cm.root().join("raw.bin")).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_delete() {
        let (_dir, cm) = manager();
        fs::create_dir(cm.root().join("full")).unwrap();
        fs::write(cm.root().join("full/x.txt"), "").unwrap();

        assert!(matches!(cm.delete("full"), Err(Error::BadRequest(_))));
        cm.delete("full/x.txt").unwrap();
        cm.delete("full").unwrap();
        assert!(!cm.root().join("full").exists());
        assert!(matches!(cm.delete("full"), Err(Error::NotFound(_))));
        assert!(matches!(cm.delete("/"), Err(Error::BadRequest(_))));
    }

    #[test]
    fn test_parse_log_line() {
        let entry =
            parse_log_line("abc123|2024-05-01T10:00:00+02:00|Ada|fix: typo | again").unwrap();
        assert_eq!(entry.commit_id, "abc123");
        assert_eq!(entry.author, "Ada");
        assert_eq!(entry.commit_message, "fix: typo | again");
        assert_eq!(entry.commit_time.to_rfc3339(), "2024-05-01T08:00:00+00:00");
        assert!(parse_log_line("garbage").is_none());
    }

    fn create(cm: &ContentsManager, dir: &str, body: serde_json::Value) -> Result<ContentsModel> {
        cm.create(dir, serde_json::from_value(body).unwrap())
    }

    #[test]
    fn test_create_untitled_entries() {
        let (_dir, cm) = manager();
        let names: Vec<String> = [
            json!({"type": "notebook"}),
            json!({"type": "notebook"}),
            json!({"ext": ".ipynb"}),
            json!({}),
            json!({"type": "file", "ext": "txt"}),
            json!({"type": "directory"}),
            json!({"type": "directory"}),
        ]
        .into_iter()
        .map(|body| create(&cm, "", body).unwrap().path)
        .collect();
        assert_eq!(
            names,
            vec![
                "Untitled.ipynb",
                "Untitled1.ipynb",
                "Untitled2.ipynb",
                "untitled",
                "untitled.txt",
                "Untitled Folder",
                "Untitled Folder 1",
            ]
        );

        let nb = cm.get("Untitled.ipynb", &ContentsRequest::default()).unwrap();
        assert_eq!(nb.kind, ContentType::Notebook);
        assert_eq!(nb.content.unwrap()["cells"], json!([]));
        assert!(cm.root().join("Untitled Folder").is_dir());
    }

    #[test]
    fn test_create_needs_an_existing_directory() {
        let (_dir, cm) = manager();
        fs::write(cm.root().join("a.txt"), "").unwrap();
        assert!(matches!(create(&cm, "a.txt", json!({})), Err(Error::BadRequest(_))));
        assert!(matches!(create(&cm, "missing", json!({})), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_copy_names() {
        let (_dir, cm) = manager();
        fs::create_dir(cm.root().join("sub")).unwrap();
        fs::write(cm.root().join("plot.ipynb"), "{}").unwrap();

        let first = create(&cm, "", json!({"copy_from": "/plot.ipynb"})).unwrap();
        assert_eq!(first.path, "plot-Copy1.ipynb");
        assert_eq!(first.kind, ContentType::Notebook);
        assert!(first.content.is_none());

        // Copying a copy does not stack suffixes.
        let second = create(&cm, "", json!({"copy_from": "plot-Copy1.ipynb"})).unwrap();
        assert_eq!(second.path, "plot-Copy2.ipynb");

        let elsewhere = create(&cm, "sub", json!({"copy_from": "plot.ipynb"})).unwrap();
        assert_eq!(elsewhere.path, "sub/plot-Copy1.ipynb");
        assert_eq!(fs::read_to_string(cm.root().join("sub/plot-Copy1.ipynb")).unwrap(), "{}");

        assert!(matches!(
            create(&cm, "", json!({"copy_from": "sub"})),
            Err(Error::BadRequest(_))
        ));
        assert!(matches!(
            create(&cm, "", json!({"copy_from": "gone.ipynb"})),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_rename() {
        let (_dir, cm) = manager();
        fs::create_dir(cm.root().join("sub")).unwrap();
        fs::write(cm.root().join("a.ipynb"), "{}").unwrap();
        fs::write(cm.root().join("b.ipynb"), "{}").unwrap();

        let moved = cm.rename("a.ipynb", "/sub/c.ipynb").unwrap();
        assert_eq!(moved.path, "sub/c.ipynb");
        assert_eq!(moved.name, "c.ipynb");
        assert!(moved.content.is_none());
        assert!(!cm.root().join("a.ipynb").exists());

        assert!(matches!(cm.rename("sub/c.ipynb", "b.ipynb"), Err(Error::Conflict(_))));
        assert!(cm.root().join("sub/c.ipynb").exists());
        assert!(matches!(cm.rename("a.ipynb", "d.ipynb"), Err(Error::NotFound(_))));
        assert!(matches!(cm.rename("", "x"), Err(Error::BadRequest(_))));
        assert!(matches!(
            cm.rename("b.ipynb", "../b.ipynb"),
            Err(Error::PathEscape(_))
        ));
        assert_eq!(cm.rename("b.ipynb", "b.ipynb").unwrap().path, "b.ipynb");
    }

    #[test]
    fn test_helpers() {
        assert_eq!(split_extension("a.tar.gz"), ("a.tar", ".gz"));
        assert_eq!(split_extension(".hidden"), (".hidden", ""));
        assert_eq!(split_extension("plain"), ("plain", ""));

        assert!(validate_commit_id("abc123").is_ok());
        assert!(validate_commit_id("HEAD").is_err());
        assert!(validate_commit_id("abc").is_err());
        assert!(validate_commit_id("abc1; rm -rf").is_err());
    }

    fn git_installed() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn init_repo(cm: &ContentsManager) {
        let steps: [&[&str]; 4] = [
            &["init", "-q"],
            &["config", "user.name", "Ada"],
            &["config", "user.email", "ada@example.com"],
            &["config", "commit.gpgsign", "false"],
        ];
        for args in steps {
            cm.git(args).unwrap();
        }
    }

    #[test]
    fn test_create_diff_and_reset_versions() {
        if !git_installed() {
            return;
        }
        let (_dir, cm) = manager();
        init_repo(&cm);
        let file = cm.root().join("nb.ipynb");

        fs::write(&file, "one\n").unwrap();
        let first = cm.create_version("nb.ipynb", "first | draft").unwrap();
        assert_eq!(first.author, "Ada");
        assert_eq!(first.commit_message, "first | draft");

        fs::write(&file, "two\n").unwrap();
        let diff = cm.version_diff("nb.ipynb", &first.commit_id).unwrap();
        assert_eq!(diff.file_content, "two\n");
        assert_eq!(diff.diff_file_content, "one\n");

        let snapshot = cm.reset_version("/nb.ipynb", &first.commit_id).unwrap();
        assert!(snapshot.commit_message.starts_with("snapshot "));
        assert_eq!(fs::read_to_string(&file).unwrap(), "one\n");

        let history = cm.versions("nb.ipynb").unwrap();
        let ids: Vec<_> = history.iter().map(|v| v.commit_id.as_str()).collect();
        assert_eq!(ids, vec![snapshot.commit_id.as_str(), first.commit_id.as_str()]);
        let undo = cm.version_diff("nb.ipynb", &snapshot.commit_id).unwrap();
        assert_eq!(undo.diff_file_content, "two\n");

        assert!(matches!(cm.create_version("nb.ipynb", "  "), Err(Error::BadRequest(_))));
        assert!(matches!(cm.version_diff("nb.ipynb", "HEAD~1"), Err(Error::BadRequest(_))));
        assert!(matches!(cm.reset_version("nb.ipynb", "0000000"), Err(Error::Git(_))));
        assert!(matches!(cm.versions("gone.ipynb"), Err(Error::NotFound(_))));
    }
}
