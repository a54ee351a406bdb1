//! Notebook cells library - cell model, Markdown rendering and the contents
//! service, re-exported for the server binary and for tests.

use regex::Regex;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod attachments;
pub mod cells;
pub mod contents;
pub mod error;
pub mod events;
pub mod handlers;
pub mod markdown;
pub mod math;
pub mod models;
pub mod notebook;
pub mod toolbar;

// ============================================================================
// Configuration
// ============================================================================

pub const DEFAULT_NOTEBOOK_DIR: &str = "notebooks";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8888";

pub const MARKDOWN_PLACEHOLDER: &str = r"Type *Markdown* and LaTeX: $\alpha^2$";
pub const RAW_PLACEHOLDER: &str = "Write raw LaTeX or other formats here, for use with nbconvert. \
It will not be rendered in the notebook. \
When passing through nbconvert, a Raw Cell's content is added to the output unmodified.";

/// A named syntax mode for raw cells, chosen when any pattern matches the
/// cell source.
#[derive(Debug, Clone)]
pub struct HighlightMode {
    pub name: String,
    pub patterns: Vec<Regex>,
}

impl HighlightMode {
    pub fn new(name: &str, patterns: &[&str]) -> std::result::Result<Self, regex::Error> {
        Ok(Self {
            name: name.to_string(),
            patterns: patterns
                .iter()
                .map(|p| Regex::new(p))
                .collect::<std::result::Result<_, _>>()?,
        })
    }
}

/// Per-kind cell settings.
#[derive(Debug, Clone)]
pub struct CellConfig {
    pub markdown_placeholder: String,
    pub raw_placeholder: String,
    pub highlight_modes: Vec<HighlightMode>,
}

impl Default for CellConfig {
    fn default() -> Self {
        Self {
            markdown_placeholder: MARKDOWN_PLACEHOLDER.to_string(),
            raw_placeholder: RAW_PLACEHOLDER.to_string(),
            highlight_modes: vec![HighlightMode::new("diff", &["^diff"]).expect("diff pattern")],
        }
    }
}

/// Server and front-end settings.
///
/// Everything the front end used to read from globals (`git_available`,
/// the notebook id) is passed in explicitly from here.
#[derive(Debug, Clone)]
pub struct Config {
    pub notebook_dir: PathBuf,
    pub static_dir: Option<PathBuf>,
    pub bind_addr: String,
    /// Enables the version-management toolbar action and history endpoint.
    pub git_available: bool,
    /// Sent to the host page with every `languageChanged` message.
    pub notebook_id: Option<String>,
    pub cells: Arc<CellConfig>,
}

impl Config {
    /// Read `NOTEBOOK_DIR`, `NOTEBOOK_STATIC_DIR`, `NOTEBOOK_BIND`,
    /// `NOTEBOOK_GIT_AVAILABLE` and `NOTEBOOK_ID`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            notebook_dir: env::var("NOTEBOOK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.notebook_dir),
            static_dir: env::var("NOTEBOOK_STATIC_DIR").ok().map(PathBuf::from),
            bind_addr: env::var("NOTEBOOK_BIND").unwrap_or(defaults.bind_addr),
            git_available: env::var("NOTEBOOK_GIT_AVAILABLE")
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
            notebook_id: env::var("NOTEBOOK_ID").ok().filter(|id| !id.is_empty()),
            cells: defaults.cells,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            notebook_dir: PathBuf::from(DEFAULT_NOTEBOOK_DIR),
            static_dir: None,
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            git_available: false,
            notebook_id: None,
            cells: Arc::new(CellConfig::default()),
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

// ============================================================================
// Application State
// ============================================================================

pub struct AppState {
    pub config: Config,
    pub contents: contents::ContentsManager,
    pub events: events::EventBus,
}

impl AppState {
    pub fn new(config: Config) -> error::Result<Self> {
        fs::create_dir_all(&config.notebook_dir)?;
        let contents = contents::ContentsManager::new(&config.notebook_dir, config.cells.clone())?;
        Ok(Self {
            config,
            contents,
            events: events::EventBus::default(),
        })
    }

    pub fn cell_options(&self) -> cells::CellOptions {
        cells::CellOptions {
            config: self.config.cells.clone(),
            events: self.events.clone(),
        }
    }
}

/// Validate that a constructed path stays within the given base directory.
/// For new files (that don't yet exist), validates the parent directory.
pub fn validate_path_within(base: &Path, target: &Path) -> error::Result<PathBuf> {
    let canonical_base = fs::canonicalize(base)?;
    let escape = || error::Error::PathEscape(target.display().to_string());

    if target.exists() {
        let canonical = fs::canonicalize(target)?;
        if canonical.starts_with(&canonical_base) {
            Ok(canonical)
        } else {
            Err(escape())
        }
    } else {
        // For new files, ensure the parent is within base
        let parent = target.parent().ok_or_else(escape)?;
        let canonical_parent = fs::canonicalize(parent)
            .map_err(|_| error::Error::NotFound(parent.display().to_string()))?;
        if canonical_parent.starts_with(&canonical_base) {
            Ok(target.to_path_buf())
        } else {
            Err(escape())
        }
    }
}

// Re-export commonly used types
pub use attachments::{Attachment, AttachmentStore, Blob};
pub use cells::{Cell, CellKind, CellOptions};
pub use contents::ContentsManager;
pub use error::{Error, Result};
pub use events::{CellId, EventBus, NotebookEvent};
pub use markdown::{html_escape, referenced_attachments, render_markdown};
pub use models::{CellData, CellType, ContentsModel, NotebookData, VersionEntry};
pub use notebook::{ActionOutcome, Notebook};
pub use toolbar::{cell_fixed_toolbar, main_toolbar, Action, CellTypeSelector, HostMessage};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true"));
        assert!(parse_flag(" 1 "));
        assert!(!parse_flag("0"));
        assert!(!parse_flag(""));
    }

    #[test]
    fn test_highlight_mode_patterns() {
        let mode = HighlightMode::new("latex", &[r"^\\begin", r"^%"]).unwrap();
        assert_eq!(mode.patterns.len(), 2);
        assert!(mode.patterns[0].is_match(r"\begin{align}"));
        assert!(HighlightMode::new("broken", &["("]).is_err());
    }

    #[test]
    fn test_validate_path_within() {
        let dir = tempfile::tempdir().unwrap();
        let inside = dir.path().join("a.ipynb");
        assert!(validate_path_within(dir.path(), &inside).is_ok());

        let outside = dir.path().join("..").join("escape.ipynb");
        assert!(matches!(
            validate_path_within(dir.path(), &outside),
            Err(Error::PathEscape(_))
        ));
    }
}
