//! Printers: result summary, tables and the engine log.

use std::{collections::BTreeMap, fs, path::Path};

use anyhow::{Context, Result};
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;

use camb4rs::Table;

pub struct SummaryPrinter {
    color: bool,
}

impl Default for SummaryPrinter {
    fn default() -> Self {
        Self { color: std::io::stdout().is_terminal() }
    }
}

impl SummaryPrinter {
    pub fn header(&self, text: &str) {
        if self.color {
            println!("{}", text.cyan());
        } else {
            println!("{}", text);
        }
    }

    pub fn tables(&self, tables: &BTreeMap<String, Table>) {
        if tables.is_empty() {
            self.warn("no output tables were produced");
            return;
        }
        for (name, table) in tables {
            let (rows, cols) = table.shape();
            if self.color {
                println!("{:<22} {} rows x {} columns", name.green(), rows, cols);
            } else {
                println!("{:<22} {} rows x {} columns", name, rows, cols);
            }
        }
    }

    pub fn warn(&self, text: &str) {
        if self.color {
            println!("{}", text.yellow());
        } else {
            println!("{}", text);
        }
    }

    pub fn log(&self, title: &str, log: &str) {
        self.header(title);
        print!("{}", log);
        if !log.ends_with('\n') {
            println!();
        }
    }
}

/// Write every table as `<dir>/<name>.dat`.
pub fn write_tables(dir: &Path, tables: &BTreeMap<String, Table>) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    for (name, table) in tables {
        let path = dir.join(format!("{name}.dat"));
        fs::write(&path, table.to_string()).with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}
