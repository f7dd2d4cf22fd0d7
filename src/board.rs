use std::collections::HashMap;

use crate::reconcile::{Cell, RenderTarget, RowAction};

pub type RowId = u64;

#[derive(Debug, Clone)]
pub struct BoardRow {
    pub id: RowId,
    pub infohash: String,
    cells: HashMap<Cell, String>,
    actions: HashMap<Cell, RowAction>,
}

impl BoardRow {
    pub fn text(&self, cell: Cell) -> &str {
        self.cells.get(&cell).map(String::as_str).unwrap_or("")
    }

    pub fn action(&self, cell: Cell) -> Option<&RowAction> {
        self.actions.get(&cell)
    }
}

/// Retained table of torrent rows in the order they first appeared. The
/// terminal UI draws it; key presses stand in for clicks.
#[derive(Debug, Default)]
pub struct Board {
    rows: Vec<BoardRow>,
    next_id: RowId,
}

impl Board {
    pub fn rows(&self) -> &[BoardRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&BoardRow> {
        self.rows.get(index)
    }

    pub fn position(&self, id: RowId) -> Option<usize> {
        self.rows.iter().position(|row| row.id == id)
    }

    /// Fires whatever handler is bound to `cell` on the row at `index`.
    pub fn click(&self, index: usize, cell: Cell) -> Option<RowAction> {
        self.rows.get(index)?.action(cell).cloned()
    }

    fn row_mut(&mut self, id: RowId) -> Option<&mut BoardRow> {
        self.rows.iter_mut().find(|row| row.id == id)
    }
}

impl RenderTarget for Board {
    type Handle = RowId;

    fn create_row(&mut self, infohash: &str) -> RowId {
        self.next_id += 1;
        self.rows.push(BoardRow {
            id: self.next_id,
            infohash: infohash.to_string(),
            cells: HashMap::new(),
            actions: HashMap::new(),
        });
        self.next_id
    }

    fn set_text(&mut self, row: &RowId, cell: Cell, text: &str) {
        if let Some(row) = self.row_mut(*row) {
            row.cells.insert(cell, text.to_string());
        }
    }

    fn on_click(&mut self, row: &RowId, cell: Cell, action: RowAction) {
        if let Some(row) = self.row_mut(*row) {
            row.actions.insert(cell, action);
        }
    }

    fn remove_row(&mut self, row: RowId) {
        self.rows.retain(|existing| existing.id != row);
    }
}
