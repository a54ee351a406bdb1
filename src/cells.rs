//! Notebook cells and their edit/rendered lifecycle.
//!
//! A [`Cell`] is one unit of a notebook. Its [`CellKind`] decides what
//! rendering means:
//! - markdown: source -> sanitized HTML with anchors and inlined attachments
//! - raw: never rendered; shows its placeholder when empty and picks a
//!   highlight mode from the source
//! - code: only the rendered/unrendered flag (execution lives elsewhere)
//!
//! Every cell starts unrendered. `render` and `unrender` return whether the
//! state actually changed; kind-specific work only happens when it did.

use regex::{NoExpand, Regex};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::sync::{Arc, LazyLock};
use tokio::io::AsyncRead;
use tracing::{debug, warn};

use crate::attachments::{attachment_key, parse_b64_data_uri, AttachmentStore, Blob};
use crate::error::{Error, Result};
use crate::events::{CellId, EventBus, NotebookEvent};
use crate::markdown::{referenced_attachments, render_markdown};
use crate::models::{CellData, CellType};
use crate::CellConfig;

static LEADING_HASHES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#*\s?").expect("leading hashes regex"));

#[derive(Debug, Clone, PartialEq)]
pub enum CellKind {
    Markdown,
    Raw {
        /// Name of the highlight mode whose pattern matched the source.
        highlight: Option<String>,
    },
    Code {
        outputs: Vec<Value>,
        execution_count: Option<Value>,
    },
}

impl CellKind {
    pub fn for_type(cell_type: CellType) -> CellKind {
        match cell_type {
            CellType::Markdown | CellType::Heading => CellKind::Markdown,
            CellType::Raw => CellKind::Raw { highlight: None },
            CellType::Code => CellKind::Code {
                outputs: Vec::new(),
                execution_count: None,
            },
        }
    }
}

/// What every cell is constructed with.
#[derive(Debug, Clone, Default)]
pub struct CellOptions {
    pub config: Arc<CellConfig>,
    pub events: EventBus,
}

#[derive(Debug)]
pub struct Cell {
    id: CellId,
    kind: CellKind,
    source: String,
    rendered: bool,
    rendered_html: String,
    attachments: AttachmentStore,
    metadata: Map<String, Value>,
    /// nbformat cell id, carried through unchanged.
    nb_id: Option<String>,
    /// Byte offset of the editor cursor in `source`.
    cursor: usize,
    selected: bool,
    config: Arc<CellConfig>,
    events: EventBus,
}

impl Cell {
    pub fn new(cell_type: CellType, options: CellOptions) -> Self {
        Self {
            id: CellId::next(),
            kind: CellKind::for_type(cell_type),
            source: String::new(),
            rendered: false,
            rendered_html: String::new(),
            attachments: AttachmentStore::new(),
            metadata: Map::new(),
            nb_id: None,
            cursor: 0,
            selected: false,
            config: options.config,
            events: options.events,
        }
    }

    /// Build a cell of `data`'s type and load `data` into it. Legacy heading
    /// cells come back as markdown.
    pub fn from_data(data: &CellData, options: CellOptions) -> Self {
        let data = match data.cell_type {
            CellType::Heading => Cow::Owned(upgrade_heading(data)),
            _ => Cow::Borrowed(data),
        };
        let mut cell = Cell::new(data.cell_type, options);
        cell.from_json(&data);
        cell
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    pub fn kind(&self) -> &CellKind {
        &self.kind
    }

    pub fn cell_type(&self) -> CellType {
        match self.kind {
            CellKind::Markdown => CellType::Markdown,
            CellKind::Raw { .. } => CellType::Raw,
            CellKind::Code { .. } => CellType::Code,
        }
    }

    /// Hint text shown when the source is empty.
    pub fn placeholder(&self) -> &str {
        match self.kind {
            CellKind::Markdown => &self.config.markdown_placeholder,
            CellKind::Raw { .. } => &self.config.raw_placeholder,
            CellKind::Code { .. } => "",
        }
    }

    pub fn is_rendered(&self) -> bool {
        self.rendered
    }

    /// `metadata.editable: false` locks the cell; anything else is editable.
    pub fn is_editable(&self) -> bool {
        self.metadata
            .get("editable")
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    pub fn attachments(&self) -> &AttachmentStore {
        &self.attachments
    }

    pub fn highlight_mode(&self) -> Option<&str> {
        match &self.kind {
            CellKind::Raw { highlight } => highlight.as_deref(),
            _ => None,
        }
    }

    // ------------------------------------------------------------------------
    // Text
    // ------------------------------------------------------------------------

    pub fn get_text(&self) -> &str {
        &self.source
    }

    /// Replace the source. The cell drops back to edit mode.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.source = text.into();
        self.cursor = self.cursor.min(self.source.len());
        while !self.source.is_char_boundary(self.cursor) {
            self.cursor -= 1;
        }
        self.unrender();
    }

    pub fn get_rendered(&self) -> &str {
        &self.rendered_html
    }

    pub fn set_rendered(&mut self, html: impl Into<String>) {
        self.rendered_html = html.into();
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Move the cursor, clamped to the source and to a char boundary.
    pub fn set_cursor(&mut self, pos: usize) {
        let mut pos = pos.min(self.source.len());
        while !self.source.is_char_boundary(pos) {
            pos -= 1;
        }
        self.cursor = pos;
    }

    fn insert_at(&mut self, pos: usize, text: &str) {
        let mut pos = pos.min(self.source.len());
        while !self.source.is_char_boundary(pos) {
            pos -= 1;
        }
        self.source.insert_str(pos, text);
        self.cursor = pos + text.len();
    }

    // ------------------------------------------------------------------------
    // Render / Unrender
    // ------------------------------------------------------------------------

    /// Enter display mode. Returns `false` when the cell already was rendered,
    /// in which case nothing else happens.
    pub fn render(&mut self) -> bool {
        if self.rendered {
            return false;
        }
        self.rendered = true;

        match self.cell_type() {
            CellType::Markdown => self.render_markdown_output(),
            CellType::Raw => self.render_raw(),
            CellType::Code | CellType::Heading => {}
        }
        true
    }

    /// Enter edit mode. Returns `false` when the cell already was unrendered.
    /// Placeholder text is cleared so the user starts from an empty editor.
    pub fn unrender(&mut self) -> bool {
        if !self.rendered {
            return false;
        }
        self.rendered = false;

        if self.source == self.placeholder() {
            self.source.clear();
            self.cursor = 0;
        }
        true
    }

    pub fn execute(&mut self) -> bool {
        self.render()
    }

    fn render_markdown_output(&mut self) {
        let text = if self.source.is_empty() {
            self.placeholder()
        } else {
            self.source.as_str()
        };
        let html = render_markdown(text, &self.attachments);
        self.set_rendered(html);
        self.events
            .publish(NotebookEvent::MarkdownRendered { cell: self.id });
    }

    fn render_raw(&mut self) {
        if self.source.is_empty() {
            self.source = self.placeholder().to_string();
        }
        self.auto_highlight();
    }

    /// Pick the first configured highlight mode whose pattern matches the
    /// source. Only raw cells highlight.
    pub fn auto_highlight(&mut self) {
        if !matches!(self.kind, CellKind::Raw { .. }) {
            return;
        }
        let mode = self
            .config
            .highlight_modes
            .iter()
            .find(|mode| mode.patterns.iter().any(|re| re.is_match(&self.source)))
            .map(|mode| mode.name.clone());
        if let CellKind::Raw { highlight } = &mut self.kind {
            *highlight = mode;
        }
    }

    // ------------------------------------------------------------------------
    // UI triggers
    // ------------------------------------------------------------------------

    /// Mark the cell selected. Returns `false` if it already was.
    pub fn select(&mut self) -> bool {
        if self.selected {
            return false;
        }
        self.selected = true;
        true
    }

    pub fn unselect(&mut self) -> bool {
        if !self.selected {
            return false;
        }
        self.selected = false;
        true
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    /// The cell's editor gained focus.
    pub fn on_focus(&mut self) {
        self.events.publish(NotebookEvent::EditMode { cell: self.id });
        if matches!(self.kind, CellKind::Raw { .. }) {
            self.unrender();
        }
    }

    /// The cell's editor lost focus. A cell that is no longer selected goes
    /// back to command mode and is executed; raw cells always re-render.
    pub fn on_blur(&mut self) {
        if !self.selected {
            self.events
                .publish(NotebookEvent::CommandMode { cell: self.id });
            self.execute();
        }
        if matches!(self.kind, CellKind::Raw { .. }) {
            self.auto_highlight();
            self.render();
        }
    }

    /// Double-clicking a rendered markdown cell opens it for editing.
    pub fn on_double_click(&mut self) -> bool {
        if self.kind != CellKind::Markdown {
            return false;
        }
        let changed = self.unrender();
        self.on_focus();
        changed
    }

    /// Clicking a heading's `¶` link refreshes the rendered output.
    pub fn on_anchor_click(&mut self) {
        if self.kind == CellKind::Markdown {
            self.unrender();
            self.render();
        }
    }

    // ------------------------------------------------------------------------
    // Markdown helpers
    // ------------------------------------------------------------------------

    /// Make the first line a heading of `level` (0 counts as 1), replacing
    /// any existing `#` prefix. Re-renders if the cell was showing output.
    pub fn set_heading_level(&mut self, level: usize) {
        let level = level.max(1);
        let was_rendered = self.rendered;
        let prefix = format!("{} ", "#".repeat(level));
        let source = LEADING_HASHES
            .replace(&self.source, NoExpand(&prefix))
            .into_owned();
        self.set_text(source);
        if was_rendered {
            self.render();
        }
    }

    // ------------------------------------------------------------------------
    // Attachments
    // ------------------------------------------------------------------------

    pub fn add_attachment(&mut self, key: impl Into<String>, mime_type: impl Into<String>, b64_data: impl Into<String>) {
        self.attachments.add(key, mime_type, b64_data);
    }

    /// Store a pasted or dropped blob as an attachment and insert
    /// `![key](attachment:key)` where the cursor was when the call started.
    ///
    /// Nothing changes until the blob has been read completely, so dropping
    /// the returned future cancels the insertion.
    pub async fn insert_inline_image_from_blob<R>(&mut self, mut blob: Blob<R>) -> Result<String>
    where
        R: AsyncRead + Unpin,
    {
        if self.kind != CellKind::Markdown {
            return Err(Error::NotMarkdown(self.cell_type()));
        }

        let pos = self.cursor;
        let key = attachment_key(blob.name.as_deref(), self.attachments.len());

        let uri = blob.read_as_data_uri().await?;
        let (uri_type, payload) = parse_b64_data_uri(&uri)?;
        if blob.mime_type != uri_type {
            warn!(
                key = %key,
                declared = %blob.mime_type,
                encoded = %uri_type,
                "blob type does not match data URI type"
            );
        }

        self.add_attachment(key.clone(), blob.mime_type.clone(), payload);
        let image = format!("![{0}](attachment:{0})", key);
        self.insert_at(pos, &image);
        debug!(key = %key, cell = ?self.id, "inserted inline image");
        Ok(key)
    }

    // ------------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------------

    /// Load persisted data into this cell.
    ///
    /// Ignored (returns `false`) when `data` is of another cell type. The
    /// loaded source becomes the starting state and the cell is rendered.
    pub fn from_json(&mut self, data: &CellData) -> bool {
        if data.cell_type != self.cell_type() {
            debug!(
                expected = %self.cell_type(),
                got = %data.cell_type,
                "ignoring cell data of another type"
            );
            return false;
        }

        self.metadata = data.metadata.clone();
        self.nb_id = data.id.clone();
        if let CellKind::Code {
            outputs,
            execution_count,
        } = &mut self.kind
        {
            *outputs = data.outputs.clone().unwrap_or_default();
            *execution_count = data.execution_count.clone();
        }

        if let Some(attachments) = &data.attachments {
            self.attachments = attachments.clone();
        }

        if let Some(source) = &data.source {
            self.set_text(source.clone());
            self.set_rendered(data.rendered.clone().unwrap_or_default());
            self.rendered = false;
            self.render();
        }
        true
    }

    /// Serialize the cell. With `gc_attachments`, only attachments that the
    /// source actually references are kept.
    pub fn to_json(&self, gc_attachments: bool) -> CellData {
        let source = if self.source == self.placeholder() {
            String::new()
        } else {
            self.source.clone()
        };

        let mut data = CellData::new(self.cell_type(), source);
        data.id = self.nb_id.clone();
        data.metadata = self.metadata.clone();

        if !self.attachments.is_empty() {
            let attachments = if gc_attachments {
                let used = referenced_attachments(&self.source);
                self.attachments.retain_referenced(&used)
            } else {
                self.attachments.clone()
            };
            if !attachments.is_empty() {
                data.attachments = Some(attachments);
            }
        }

        if let CellKind::Code {
            outputs,
            execution_count,
        } = &self.kind
        {
            data.outputs = Some(outputs.clone());
            data.execution_count = Some(execution_count.clone().unwrap_or(Value::Null));
        }
        data
    }
}

/// nbformat 3 heading cell -> markdown cell with a `#` prefix.
fn upgrade_heading(data: &CellData) -> CellData {
    let level = data.level.unwrap_or(1).clamp(1, 6);
    let text = data.source.as_deref().unwrap_or_default();
    let mut upgraded = data.clone();
    upgraded.cell_type = CellType::Markdown;
    upgraded.level = None;
    upgraded.source = Some(format!("{} {}", "#".repeat(level), text));
    upgraded
}

#[cfg(test)]
#[path = "cells_test.rs"]
mod cells_test;
