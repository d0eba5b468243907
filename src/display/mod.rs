//! Terminal output for the CLI: tables and progress bars.

pub mod progress;
pub mod tables;

pub use progress::{create_progress_bar, create_spinner, with_spinner};
pub use tables::{TableBuilder, create_results_table, create_status_table};
