//! The notebook document: an ordered list of cells with a selection.
//!
//! This is where toolbar actions land. Cells never reach back into the
//! notebook; side effects that involve the document (such as whether image
//! paste is allowed) are applied here around the cell operation.

use serde_json::{Map, Value};
use tokio::io::AsyncRead;
use tracing::{debug, warn};

use crate::attachments::Blob;
use crate::cells::{Cell, CellOptions};
use crate::error::{Error, Result};
use crate::events::{CellId, NotebookEvent};
use crate::models::{CellData, CellType, NotebookData};
use crate::toolbar::Action;

/// Result of a toolbar action. Actions the document cannot carry out on its
/// own are handed back to the host as requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Done,
    NoChange,
    SaveRequested,
    ReportRequested,
    VersionManagementRequested,
}

#[derive(Debug)]
pub struct Notebook {
    cells: Vec<Cell>,
    /// Selection is the contiguous range between `anchor` and `cursor`.
    cursor: usize,
    anchor: usize,
    clipboard: Vec<CellData>,
    insert_image_enabled: bool,
    metadata: Map<String, Value>,
    nbformat: u32,
    nbformat_minor: u32,
    options: CellOptions,
}

impl Notebook {
    /// A notebook holding one empty code cell, selected.
    pub fn new(options: CellOptions) -> Self {
        Self::from_json(&NotebookData::default(), options)
    }

    pub fn from_json(data: &NotebookData, options: CellOptions) -> Self {
        let mut cells: Vec<Cell> = data
            .cells
            .iter()
            .map(|cell| Cell::from_data(cell, options.clone()))
            .collect();
        if cells.is_empty() {
            cells.push(Cell::new(CellType::Code, options.clone()));
        }

        let mut notebook = Self {
            cells,
            cursor: 0,
            anchor: 0,
            clipboard: Vec::new(),
            insert_image_enabled: false,
            metadata: data.metadata.clone(),
            nbformat: data.nbformat,
            nbformat_minor: data.nbformat_minor,
            options,
        };
        notebook.sync_selection();
        notebook
    }

    pub fn to_json(&self, gc_attachments: bool) -> NotebookData {
        NotebookData {
            cells: self
                .cells
                .iter()
                .map(|cell| cell.to_json(gc_attachments))
                .collect(),
            metadata: self.metadata.clone(),
            nbformat: self.nbformat,
            nbformat_minor: self.nbformat_minor,
        }
    }

    // ------------------------------------------------------------------------
    // Access
    // ------------------------------------------------------------------------

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn cell(&self, index: usize) -> Option<&Cell> {
        self.cells.get(index)
    }

    pub fn cell_mut(&mut self, index: usize) -> Option<&mut Cell> {
        self.cells.get_mut(index)
    }

    pub fn find_cell_index(&self, id: CellId) -> Option<usize> {
        self.cells.iter().position(|cell| cell.id() == id)
    }

    pub fn selected_index(&self) -> usize {
        self.cursor
    }

    pub fn selected_cell(&self) -> &Cell {
        &self.cells[self.cursor]
    }

    pub fn selected_cell_mut(&mut self) -> &mut Cell {
        &mut self.cells[self.cursor]
    }

    pub fn get_selected_cells_indices(&self) -> Vec<usize> {
        let (lo, hi) = self.selection_bounds();
        (lo..=hi).collect()
    }

    pub fn insert_image_enabled(&self) -> bool {
        self.insert_image_enabled
    }

    pub fn set_insert_image_enabled(&mut self, enabled: bool) {
        self.insert_image_enabled = enabled;
    }

    fn selection_bounds(&self) -> (usize, usize) {
        (self.anchor.min(self.cursor), self.anchor.max(self.cursor))
    }

    fn sync_selection(&mut self) {
        let (lo, hi) = self.selection_bounds();
        for (i, cell) in self.cells.iter_mut().enumerate() {
            if (lo..=hi).contains(&i) {
                cell.select();
            } else {
                cell.unselect();
            }
        }
    }

    // ------------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------------

    /// Select a single cell and announce its type.
    pub fn select(&mut self, index: usize) -> Result<()> {
        if index >= self.cells.len() {
            return Err(Error::NoSuchCell(index));
        }
        self.cursor = index;
        self.anchor = index;
        self.sync_selection();
        self.announce_selection();
        Ok(())
    }

    /// Grow the selection from its anchor to `index`.
    pub fn extend_selection_to(&mut self, index: usize) -> Result<()> {
        if index >= self.cells.len() {
            return Err(Error::NoSuchCell(index));
        }
        self.cursor = index;
        self.sync_selection();
        self.announce_selection();
        Ok(())
    }

    fn announce_selection(&mut self) {
        let cell = &self.cells[self.cursor];
        // Only markdown cells in edit mode take pasted images.
        self.insert_image_enabled = cell.cell_type() == CellType::Markdown && !cell.is_rendered();
        self.options
            .events
            .publish(NotebookEvent::SelectedCellTypeChanged {
                cell_type: cell.cell_type(),
                editable: cell.is_editable(),
            });
    }

    /// Put a cell into edit mode.
    pub fn unrender_cell(&mut self, index: usize) -> Result<bool> {
        let cell = self.cells.get_mut(index).ok_or(Error::NoSuchCell(index))?;
        let changed = cell.unrender();
        if cell.cell_type() == CellType::Markdown {
            self.insert_image_enabled = true;
        }
        Ok(changed)
    }

    /// Forward a double-click to a cell. A markdown cell opened for editing
    /// accepts pasted images.
    pub fn double_click_cell(&mut self, index: usize) -> Result<bool> {
        let cell = self.cells.get_mut(index).ok_or(Error::NoSuchCell(index))?;
        let changed = cell.on_double_click();
        self.sync_image_insert(index);
        Ok(changed)
    }

    /// Forward editor focus to a cell.
    pub fn focus_cell(&mut self, index: usize) -> Result<()> {
        let cell = self.cells.get_mut(index).ok_or(Error::NoSuchCell(index))?;
        cell.on_focus();
        self.sync_image_insert(index);
        Ok(())
    }

    fn sync_image_insert(&mut self, index: usize) {
        let cell = &self.cells[index];
        if cell.cell_type() == CellType::Markdown && !cell.is_rendered() {
            self.insert_image_enabled = true;
        }
    }

    // ------------------------------------------------------------------------
    // Insertion and removal
    // ------------------------------------------------------------------------

    /// Insert a new cell of `cell_type` after `index`; returns its index.
    pub fn insert_cell_below(&mut self, cell_type: CellType, index: usize) -> usize {
        let at = (index + 1).min(self.cells.len());
        self.insert_cell_at(cell_type, at)
    }

    pub fn insert_cell_above(&mut self, cell_type: CellType, index: usize) -> usize {
        self.insert_cell_at(cell_type, index.min(self.cells.len()))
    }

    fn insert_cell_at(&mut self, cell_type: CellType, at: usize) -> usize {
        let cell = Cell::new(cell_type, self.options.clone());
        self.cells.insert(at, cell);
        if self.cursor >= at {
            self.cursor += 1;
        }
        if self.anchor >= at {
            self.anchor += 1;
        }
        self.sync_selection();
        at
    }

    /// Remove the selected cells. A notebook never ends up empty.
    pub fn delete_selected_cells(&mut self) -> Vec<CellData> {
        let (lo, hi) = self.selection_bounds();
        let removed: Vec<CellData> = self
            .cells
            .drain(lo..=hi)
            .map(|cell| cell.to_json(false))
            .collect();
        if self.cells.is_empty() {
            self.cells.push(Cell::new(CellType::Code, self.options.clone()));
        }
        let next = lo.min(self.cells.len() - 1);
        self.cursor = next;
        self.anchor = next;
        self.sync_selection();
        self.announce_selection();
        debug!(count = removed.len(), "deleted cells");
        removed
    }

    // ------------------------------------------------------------------------
    // Clipboard
    // ------------------------------------------------------------------------

    pub fn copy_selected_cells(&mut self) {
        let (lo, hi) = self.selection_bounds();
        self.clipboard = self.cells[lo..=hi]
            .iter()
            .map(|cell| cell.to_json(false))
            .collect();
    }

    pub fn cut_selected_cells(&mut self) {
        self.clipboard = self.delete_selected_cells();
    }

    /// Insert copies of the clipboard after the selection. The clipboard is
    /// kept, so pasting again makes further independent copies.
    pub fn paste_cells_below(&mut self) -> bool {
        if self.clipboard.is_empty() {
            return false;
        }
        let (_, hi) = self.selection_bounds();
        let first = hi + 1;
        for (offset, data) in self.clipboard.iter().enumerate() {
            let cell = Cell::from_data(data, self.options.clone());
            self.cells.insert(first + offset, cell);
        }
        self.cursor = first;
        self.anchor = first;
        self.sync_selection();
        self.announce_selection();
        true
    }

    // ------------------------------------------------------------------------
    // Reordering
    // ------------------------------------------------------------------------

    pub fn move_selection_up(&mut self) -> bool {
        let (lo, hi) = self.selection_bounds();
        if lo == 0 {
            return false;
        }
        let above = self.cells.remove(lo - 1);
        self.cells.insert(hi, above);
        self.cursor -= 1;
        self.anchor -= 1;
        true
    }

    pub fn move_selection_down(&mut self) -> bool {
        let (lo, hi) = self.selection_bounds();
        if hi + 1 >= self.cells.len() {
            return false;
        }
        let below = self.cells.remove(hi + 1);
        self.cells.insert(lo, below);
        self.cursor += 1;
        self.anchor += 1;
        true
    }

    // ------------------------------------------------------------------------
    // Cell type conversion
    // ------------------------------------------------------------------------

    pub fn cells_to_code(&mut self) {
        self.convert_selected(CellType::Code);
    }

    pub fn cells_to_markdown(&mut self) {
        self.convert_selected(CellType::Markdown);
    }

    pub fn cells_to_raw(&mut self) {
        self.convert_selected(CellType::Raw);
    }

    /// Legacy "heading" cell type: becomes a markdown heading of `level`.
    pub fn to_heading(&mut self, level: usize) {
        warn!("heading cells are deprecated, converting to a markdown heading");
        self.cells_to_markdown();
        for index in self.get_selected_cells_indices() {
            self.cells[index].set_heading_level(level);
        }
        self.announce_selection();
    }

    fn convert_selected(&mut self, target: CellType) {
        let mut changed = false;
        for index in self.get_selected_cells_indices() {
            let cell = &self.cells[index];
            if cell.cell_type() == target {
                continue;
            }

            let mut data = cell.to_json(false);
            data.cell_type = target;
            data.rendered = None;
            data.outputs = None;
            data.execution_count = None;
            if target == CellType::Code {
                data.attachments = None;
            }

            let mut converted = Cell::from_data(&data, self.options.clone());
            converted.unrender();
            self.cells[index] = converted;
            changed = true;
        }
        if changed {
            self.sync_selection();
            self.announce_selection();
        }
    }

    // ------------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------------

    pub fn execute_selected(&mut self) {
        for index in self.get_selected_cells_indices() {
            self.cells[index].execute();
        }
        self.announce_selection();
    }

    pub fn execute_all(&mut self) {
        for cell in &mut self.cells {
            cell.execute();
        }
        self.announce_selection();
    }

    // ------------------------------------------------------------------------
    // Images
    // ------------------------------------------------------------------------

    /// Paste or drop an image into the selected cell.
    pub async fn insert_image<R>(&mut self, blob: Blob<R>) -> Result<String>
    where
        R: AsyncRead + Unpin,
    {
        if !self.insert_image_enabled {
            return Err(Error::ImageInsertDisabled);
        }
        self.selected_cell_mut()
            .insert_inline_image_from_blob(blob)
            .await
    }

    // ------------------------------------------------------------------------
    // Toolbar actions
    // ------------------------------------------------------------------------

    pub fn apply_action(&mut self, action: Action) -> Result<ActionOutcome> {
        let done = |changed: bool| {
            if changed {
                ActionOutcome::Done
            } else {
                ActionOutcome::NoChange
            }
        };

        let outcome = match action {
            Action::InsertCellCode | Action::InsertCellMarkdown => {
                let cell_type = if action == Action::InsertCellCode {
                    CellType::Code
                } else {
                    CellType::Markdown
                };
                let index = self.insert_cell_below(cell_type, self.cursor);
                self.select(index)?;
                ActionOutcome::Done
            }
            Action::SaveNotebook => ActionOutcome::SaveRequested,
            Action::RunCell => {
                self.execute_selected();
                ActionOutcome::Done
            }
            Action::RunAllCells => {
                self.execute_all();
                ActionOutcome::Done
            }
            Action::VersionManagement => ActionOutcome::VersionManagementRequested,
            Action::NotebookReport => ActionOutcome::ReportRequested,
            Action::MoveCellUp => done(self.move_selection_up()),
            Action::MoveCellDown => done(self.move_selection_down()),
            Action::DeleteCell => {
                self.delete_selected_cells();
                ActionOutcome::Done
            }
            Action::CutCell => {
                self.cut_selected_cells();
                ActionOutcome::Done
            }
            Action::CopyCell => {
                self.copy_selected_cells();
                ActionOutcome::Done
            }
            Action::PasteCellBelow => done(self.paste_cells_below()),
        };
        debug!(action = action.id(), ?outcome, "applied toolbar action");
        Ok(outcome)
    }
}
