//! Table formatting for status and query output.

use comfy_table::{
    Attribute, Cell, CellAlignment, Color, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_FULL,
};

use crate::server::ServerStatus;
use crate::types::Sims;

/// Builder for creating formatted tables.
pub struct TableBuilder {
    table: Table,
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TableBuilder {
    pub fn new() -> Self {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.apply_modifier(UTF8_ROUND_CORNERS);
        Self { table }
    }

    pub fn set_headers(mut self, headers: Vec<&str>) -> Self {
        let header_cells: Vec<Cell> = headers
            .into_iter()
            .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
            .collect();
        self.table.set_header(header_cells);
        self
    }

    pub fn add_row(mut self, row: Vec<String>) -> Self {
        self.table.add_row(row);
        self
    }

    pub fn build(self) -> String {
        self.table.to_string()
    }
}

/// Two-column table describing the index.
pub fn create_status_table(status: &ServerStatus) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.apply_modifier(UTF8_ROUND_CORNERS);

    table.set_header(vec![
        Cell::new("Property").add_attribute(Attribute::Bold),
        Cell::new("Value").add_attribute(Attribute::Bold),
    ]);

    table.add_row(vec!["Location".to_string(), status.path.display().to_string()]);
    if !status.initialized {
        table.add_row(vec![
            Cell::new("Index"),
            Cell::new("not created").fg(Color::Yellow),
        ]);
    } else {
        table.add_row(vec!["Documents".to_string(), status.documents.to_string()]);
        table.add_row(vec![
            "Stored vectors".to_string(),
            status.stored_vectors.to_string(),
        ]);

        // Ghost slots are never reclaimed, so flag when they dominate
        let ghost_color = if status.ghost_slots > status.documents as u64 {
            Color::Yellow
        } else {
            Color::Reset
        };
        table.add_row(vec![
            Cell::new("Ghost slots"),
            Cell::new(status.ghost_slots).fg(ghost_color),
        ]);
        table.add_row(vec!["Shards".to_string(), status.shards.to_string()]);
        table.add_row(vec![
            "Dimension".to_string(),
            status
                .dimension
                .map_or_else(|| "-".to_string(), |d| d.to_string()),
        ]);
    }
    table.add_row(vec!["Precompute".to_string(), status.precompute.to_string()]);
    table.add_row(vec!["Top sims".to_string(), status.top_sims.to_string()]);
    table.add_row(vec!["Score mode".to_string(), status.score_mode.clone()]);
    table.add_row(vec![
        "Model".to_string(),
        status.model.clone().unwrap_or_else(|| "none".to_string()),
    ]);
    if let Some(index_model) = &status.index_model {
        let color = if status.model.as_ref() == Some(index_model) {
            Color::Reset
        } else {
            Color::Yellow
        };
        table.add_row(vec![
            Cell::new("Indexed with"),
            Cell::new(index_model).fg(color),
        ]);
    }
    table.add_row(vec!["Buffered".to_string(), status.buffered.to_string()]);

    table.to_string()
}

/// Ranked query results.
pub fn create_results_table(sims: &Sims) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.apply_modifier(UTF8_ROUND_CORNERS);

    table.set_header(vec![
        Cell::new("#").add_attribute(Attribute::Bold),
        Cell::new("Document").add_attribute(Attribute::Bold),
        Cell::new("Score").add_attribute(Attribute::Bold),
    ]);

    for (rank, (id, score)) in sims.iter().enumerate() {
        table.add_row(vec![
            Cell::new(rank + 1),
            Cell::new(id),
            Cell::new(format!("{score:.4}")).set_alignment(CellAlignment::Right),
        ]);
    }

    table.to_string()
}
