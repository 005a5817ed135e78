use anyhow::Result;
use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{Attribute, Cell, Color as TableColor, Table};
use serde::Serialize;

use crate::theme::{MARKS, PALETTE};

/// Output format options for CLI commands
#[derive(Clone, Debug, ValueEnum, Default, PartialEq)]
pub enum OutputFormat {
    /// Formatted table output (default)
    #[default]
    Table,
    /// JSON output for scripting
    Json,
    /// Compact single-line output
    Compact,
}

/// Global CLI options that affect output and behavior
#[derive(Clone, Debug, Default)]
pub struct GlobalOptions {
    pub output_format: OutputFormat,
    pub quiet: bool,
    pub verbose: bool,
    pub no_color: bool,
}

/// Data that can be rendered as a table or a single line
pub trait TableDisplay {
    fn to_table(&self, output: &OutputManager) -> Table;
    fn to_compact(&self) -> String;
}

/// Output manager handles formatting and display
pub struct OutputManager {
    pub options: GlobalOptions,
}

impl OutputManager {
    pub fn new(options: GlobalOptions) -> Self {
        Self { options }
    }

    /// Display data according to the configured output format
    pub fn display<T>(&self, data: &T) -> Result<()>
    where
        T: Serialize + TableDisplay,
    {
        if self.options.quiet {
            return Ok(());
        }

        match self.options.output_format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(data)?;
                println!("{json}");
            }
            OutputFormat::Table => {
                let table = data.to_table(self);
                println!("{table}");
            }
            OutputFormat::Compact => {
                println!("{}", data.to_compact());
            }
        }
        Ok(())
    }

    fn is_json(&self) -> bool {
        matches!(self.options.output_format, OutputFormat::Json)
    }

    fn line(&self, icon: &str, color: colored::Color, message: &str) -> String {
        if self.options.no_color {
            format!("{icon} {message}")
        } else {
            format!("{} {}", icon.color(color), message.color(color))
        }
    }

    /// Display a success message with color and icon
    pub fn success(&self, message: &str) {
        if !self.options.quiet && !self.is_json() {
            println!("{}", self.line(MARKS.saved, PALETTE.saved.text, message));
        }
    }

    /// Display a warning message
    pub fn warning(&self, message: &str) {
        if !self.options.quiet && !self.is_json() {
            println!("{}", self.line(MARKS.warning, PALETTE.warning.text, message));
        }
    }

    /// Display info message with color and icon
    pub fn info(&self, message: &str) {
        if !self.options.quiet && !self.is_json() {
            println!("{}", self.line(MARKS.note, PALETTE.note.text, message));
        }
    }

    /// Display verbose information (only if verbose mode is enabled)
    pub fn verbose(&self, message: &str) {
        if self.options.verbose && !self.options.quiet {
            eprintln!("{}", self.line(MARKS.step, PALETTE.muted.text, message));
        }
    }

    /// Display a heading
    pub fn heading(&self, text: &str) {
        if !self.options.quiet && !self.is_json() {
            let output = if self.options.no_color {
                format!("\n{text}\n{}", "=".repeat(text.len()))
            } else {
                format!("\n{}", text.color(PALETTE.title.text).bold())
            };
            println!("{output}");
        }
    }

    /// Display a bullet list item
    pub fn bullet(&self, text: &str) {
        if !self.options.quiet && !self.is_json() {
            let output = if self.options.no_color {
                format!("  {} {text}", MARKS.bullet)
            } else {
                format!("  {} {text}", MARKS.bullet.color(PALETTE.muted.text))
            };
            println!("{output}");
        }
    }

    /// Create a themed table with a bold header row
    pub fn create_table(&self, headers: &[&str]) -> Table {
        let mut table = Table::new();
        if self.options.no_color {
            table.load_preset(comfy_table::presets::ASCII_FULL);
        } else {
            table.load_preset(comfy_table::presets::UTF8_FULL_CONDENSED);
        }

        let header_cells: Vec<Cell> = headers
            .iter()
            .map(|header| {
                let cell = Cell::new(header).add_attribute(Attribute::Bold);
                if self.options.no_color {
                    cell
                } else {
                    cell.fg(TableColor::Cyan)
                }
            })
            .collect();
        table.set_header(header_cells);
        table
    }
}
