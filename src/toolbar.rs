//! Toolbar definitions and the cell-type selector.
//!
//! Toolbars are plain data here: groups of action ids with optional labels,
//! served as JSON for the front end to draw. Clicking a button comes back as
//! an [`Action`] that [`Notebook::apply_action`] carries out.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::CellType;
use crate::notebook::Notebook;
use crate::Config;

// ============================================================================
// Actions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "jupyter-notebook:insert-cell-code")]
    InsertCellCode,
    #[serde(rename = "jupyter-notebook:insert-cell-markdown")]
    InsertCellMarkdown,
    #[serde(rename = "jupyter-notebook:save-notebook")]
    SaveNotebook,
    #[serde(rename = "jupyter-notebook:run-cell")]
    RunCell,
    #[serde(rename = "jupyter-notebook:run-all-cells")]
    RunAllCells,
    #[serde(rename = "jupyter-notebook:version-management")]
    VersionManagement,
    #[serde(rename = "jupyter-notebook:notebook-report")]
    NotebookReport,
    #[serde(rename = "jupyter-notebook:move-cell-up")]
    MoveCellUp,
    #[serde(rename = "jupyter-notebook:move-cell-down")]
    MoveCellDown,
    #[serde(rename = "jupyter-notebook:delete-cell")]
    DeleteCell,
    #[serde(rename = "jupyter-notebook:cut-cell")]
    CutCell,
    #[serde(rename = "jupyter-notebook:copy-cell")]
    CopyCell,
    #[serde(rename = "jupyter-notebook:paste-cell-below")]
    PasteCellBelow,
}

impl Action {
    pub const ALL: [Action; 13] = [
        Action::InsertCellCode,
        Action::InsertCellMarkdown,
        Action::SaveNotebook,
        Action::RunCell,
        Action::RunAllCells,
        Action::VersionManagement,
        Action::NotebookReport,
        Action::MoveCellUp,
        Action::MoveCellDown,
        Action::DeleteCell,
        Action::CutCell,
        Action::CopyCell,
        Action::PasteCellBelow,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Action::InsertCellCode => "jupyter-notebook:insert-cell-code",
            Action::InsertCellMarkdown => "jupyter-notebook:insert-cell-markdown",
            Action::SaveNotebook => "jupyter-notebook:save-notebook",
            Action::RunCell => "jupyter-notebook:run-cell",
            Action::RunAllCells => "jupyter-notebook:run-all-cells",
            Action::VersionManagement => "jupyter-notebook:version-management",
            Action::NotebookReport => "jupyter-notebook:notebook-report",
            Action::MoveCellUp => "jupyter-notebook:move-cell-up",
            Action::MoveCellDown => "jupyter-notebook:move-cell-down",
            Action::DeleteCell => "jupyter-notebook:delete-cell",
            Action::CutCell => "jupyter-notebook:cut-cell",
            Action::CopyCell => "jupyter-notebook:copy-cell",
            Action::PasteCellBelow => "jupyter-notebook:paste-cell-below",
        }
    }

    pub fn from_id(id: &str) -> Option<Action> {
        Action::ALL.into_iter().find(|action| action.id() == id)
    }
}

// ============================================================================
// Toolbar Groups
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolbarItem {
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl From<Action> for ToolbarItem {
    fn from(action: Action) -> Self {
        Self {
            action,
            label: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolbarGroup {
    pub id: &'static str,
    pub items: Vec<ToolbarItem>,
}

impl ToolbarGroup {
    fn new(id: &'static str, actions: &[Action]) -> Self {
        Self {
            id,
            items: actions.iter().copied().map(ToolbarItem::from).collect(),
        }
    }
}

/// The notebook's main toolbar. Version management only appears when git is
/// available.
pub fn main_toolbar(config: &Config) -> Vec<ToolbarGroup> {
    let insert = ToolbarGroup {
        id: "insert_below_with_type",
        items: vec![
            ToolbarItem {
                action: Action::InsertCellCode,
                label: Some("Code".to_string()),
            },
            ToolbarItem {
                action: Action::InsertCellMarkdown,
                label: Some("Text".to_string()),
            },
        ],
    };

    let mut operate = vec![Action::SaveNotebook, Action::RunCell, Action::RunAllCells];
    if config.git_available {
        operate.push(Action::VersionManagement);
    }
    operate.push(Action::NotebookReport);

    vec![insert, ToolbarGroup::new("step_action_sections", &operate)]
}

/// Toolbar pinned to each cell.
pub fn cell_fixed_toolbar() -> Vec<ToolbarGroup> {
    vec![
        ToolbarGroup::new("move_up_down", &[Action::MoveCellUp, Action::MoveCellDown]),
        ToolbarGroup::new("delete-cell", &[Action::DeleteCell]),
        ToolbarGroup::new(
            "cut_copy_paste",
            &[Action::CutCell, Action::CopyCell, Action::PasteCellBelow],
        ),
    ]
}

// ============================================================================
// Cell Type Selector
// ============================================================================

/// Message posted to the embedding page whenever the selected cell type
/// changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostMessage {
    pub selected: CellType,
    pub notebook_id: Option<String>,
    #[serde(rename = "eventType")]
    pub event_type: &'static str,
}

/// Drop-down state for choosing the type of the selected cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellTypeSelector {
    pub value: String,
    pub disabled: bool,
    pub multiselect_visible: bool,
}

impl Default for CellTypeSelector {
    fn default() -> Self {
        Self {
            value: CellType::Code.as_str().to_string(),
            disabled: false,
            multiselect_visible: false,
        }
    }
}

impl CellTypeSelector {
    /// Follow a `selected_cell_type_changed` event.
    pub fn on_selected_cell_type_changed(
        &mut self,
        cell_type: CellType,
        editable: bool,
        selected_count: usize,
        notebook_id: Option<&str>,
    ) -> HostMessage {
        self.disabled = !editable;
        if selected_count > 1 {
            self.multiselect_visible = true;
            self.value = "multiselect".to_string();
        } else {
            self.multiselect_visible = false;
            self.value = match cell_type {
                CellType::Heading => CellType::Markdown.as_str(),
                other => other.as_str(),
            }
            .to_string();
        }

        HostMessage {
            selected: cell_type,
            notebook_id: notebook_id.map(str::to_string),
            event_type: "languageChanged",
        }
    }

    /// Apply a value picked in the drop-down to the selected cells. Returns
    /// whether the notebook changed.
    pub fn on_change(&mut self, value: &str, notebook: &mut Notebook) -> bool {
        match value {
            "code" => notebook.cells_to_code(),
            "markdown" => notebook.cells_to_markdown(),
            "raw" => notebook.cells_to_raw(),
            "heading" => {
                notebook.to_heading(1);
                self.value = CellType::Markdown.as_str().to_string();
                return true;
            }
            "multiselect" => return false,
            other => {
                warn!(cell_type = other, "unrecognized cell type");
                return false;
            }
        }
        debug!(cell_type = value, "changed selected cell type");
        self.value = value.to_string();
        true
    }
}
