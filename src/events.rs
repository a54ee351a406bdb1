//! Notebook event bus.
//!
//! Cells and the notebook publish lifecycle transitions here; toolbars and
//! the embedding page subscribe. Backed by a tokio broadcast channel, so a
//! slow subscriber lags instead of blocking publishers.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

use crate::models::CellType;

/// Process-unique identifier of a live cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CellId(u64);

impl CellId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        CellId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event")]
pub enum NotebookEvent {
    /// A cell's editor gained focus.
    EditMode { cell: CellId },
    /// A cell's editor lost focus and the cell is no longer selected.
    CommandMode { cell: CellId },
    MarkdownRendered { cell: CellId },
    SelectedCellTypeChanged { cell_type: CellType, editable: bool },
}

impl NotebookEvent {
    /// Event name as used by the browser front end.
    pub fn name(&self) -> &'static str {
        match self {
            NotebookEvent::EditMode { .. } => "edit_mode.Cell",
            NotebookEvent::CommandMode { .. } => "command_mode.Cell",
            NotebookEvent::MarkdownRendered { .. } => "rendered.MarkdownCell",
            NotebookEvent::SelectedCellTypeChanged { .. } => "selected_cell_type_changed.Notebook",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<NotebookEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: NotebookEvent) {
        tracing::trace!(event = event.name(), "publish");
        // No subscribers is fine: nobody is listening yet.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotebookEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        bus.publish(NotebookEvent::EditMode { cell: CellId::next() });
    }

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let cell = CellId::next();
        bus.publish(NotebookEvent::EditMode { cell });
        bus.publish(NotebookEvent::CommandMode { cell });

        assert_eq!(rx.recv().await.unwrap().name(), "edit_mode.Cell");
        assert_eq!(rx.recv().await.unwrap(), NotebookEvent::CommandMode { cell });
    }

    #[test]
    fn test_cell_ids_are_unique() {
        assert_ne!(CellId::next(), CellId::next());
    }
}
