pub mod check;
pub mod compile;

use std::path::Path;
use std::process;

use colored::Colorize;
use cyphy::model::DesignView;
use cyphy::sema::{Diagnostics, Level};

/// Read a serialized design view, exiting with a message on failure.
pub fn load_view(path: &Path) -> DesignView {
    let source = std::fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("Error reading {}: {e}", path.display());
        process::exit(1);
    });
    serde_json::from_str(&source).unwrap_or_else(|e| {
        eprintln!("Error parsing {}: {e}", path.display());
        process::exit(1);
    })
}

pub fn print_diagnostics(ds: &Diagnostics) {
    for d in &ds.elements {
        let tag = match d.level {
            Level::Info => "info".normal(),
            Level::Warning => "warning".yellow().bold(),
            Level::Error => "error".red().bold(),
            Level::Success => "ok".green().bold(),
        };
        eprintln!("{tag}: {}", d.message);
    }
}
