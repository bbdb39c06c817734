use anyhow::Result;
use changeledger::{ChangeEntry, ChangeState, LockEntry};
use chrono::Utc;
use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{Attribute, Cell, Table};
use serde::Serialize;
use std::io::Write;

use crate::theme::{ICONS, THEME, table_color};

#[derive(Clone, Debug, ValueEnum, Default, PartialEq)]
pub enum OutputFormat {
    /// Formatted table output (default)
    #[default]
    Table,
    /// JSON output for scripting
    Json,
    /// One line per entry
    Compact,
}

#[derive(Clone, Debug, Default)]
pub struct GlobalOptions {
    pub output_format: OutputFormat,
    pub quiet: bool,
    pub verbose: bool,
    pub no_color: bool,
}

/// Data that can be rendered in every [`OutputFormat`].
pub trait TableDisplay {
    fn to_table(&self, options: &GlobalOptions) -> Table;
    fn to_compact(&self) -> String;
}

pub struct OutputManager {
    pub options: GlobalOptions,
}

impl OutputManager {
    pub fn new(options: GlobalOptions) -> Self {
        Self { options }
    }

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
                println!("{}", data.to_table(&self.options));
            }
            OutputFormat::Compact => {
                println!("{}", data.to_compact());
            }
        }
        Ok(())
    }

    fn line(&self, icon: &str, message: &str, color: colored::Color) -> String {
        if self.options.no_color {
            format!("{icon} {message}")
        } else {
            format!("{} {}", icon.color(color), message.color(color))
        }
    }

    pub fn success(&self, message: &str) {
        if !self.options.quiet {
            println!("{}", self.line(ICONS.done, message, THEME.success));
        }
    }

    /// Errors print even in quiet mode.
    pub fn error(&self, message: &str) {
        eprintln!("{}", self.line(ICONS.failed, message, THEME.error));
    }

    pub fn warning(&self, message: &str) {
        if !self.options.quiet {
            println!("{}", self.line(ICONS.caution, message, THEME.warning));
        }
    }

    pub fn info(&self, message: &str) {
        if !self.options.quiet {
            println!("{}", self.line(ICONS.note, message, THEME.info));
        }
    }

    /// Only shown with `--verbose`.
    pub fn verbose(&self, message: &str) {
        if self.options.verbose && !self.options.quiet {
            eprintln!("{}", self.line(ICONS.step, message, THEME.muted));
        }
    }

    pub fn progress(&self, message: &str) {
        if self.options.quiet || self.options.output_format == OutputFormat::Json {
            return;
        }
        let output = if self.options.no_color {
            format!("{} {message}...", ICONS.pending)
        } else {
            format!(
                "{} {}...",
                ICONS.pending.color(THEME.highlight).bold(),
                message.color(THEME.highlight)
            )
        };
        print!("\r{output}");
        std::io::stdout().flush().ok();
    }

    pub fn clear_line(&self) {
        if self.options.quiet || self.options.output_format == OutputFormat::Json {
            return;
        }
        print!("\r{}\r", " ".repeat(80));
        std::io::stdout().flush().ok();
    }
}

fn themed_table(options: &GlobalOptions) -> Table {
    let mut table = Table::new();
    if options.no_color {
        table.load_preset(comfy_table::presets::ASCII_FULL);
    } else {
        table.load_preset(comfy_table::presets::UTF8_FULL_CONDENSED);
    }
    table
}

fn header(options: &GlobalOptions, headers: &[&str]) -> Vec<Cell> {
    headers
        .iter()
        .map(|h| {
            let cell = Cell::new(h).add_attribute(Attribute::Bold);
            if options.no_color { cell } else { cell.fg(table_color(THEME.secondary)) }
        })
        .collect()
}

fn state_cell(state: Option<ChangeState>, options: &GlobalOptions) -> Cell {
    let label = state.map_or_else(|| "-".to_string(), |s| s.to_string());
    if options.no_color {
        return Cell::new(label);
    }
    Cell::new(label).fg(table_color(THEME.state_color(state)))
}

/// A list of entries, sorted by timestamp for display.
#[derive(Serialize)]
#[serde(transparent)]
pub struct EntriesView(pub Vec<ChangeEntry>);

impl EntriesView {
    pub fn new(mut entries: Vec<ChangeEntry>) -> Self {
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.change_id.cmp(&b.change_id)));
        Self(entries)
    }
}

impl TableDisplay for EntriesView {
    fn to_table(&self, options: &GlobalOptions) -> Table {
        let mut table = themed_table(options);
        if self.0.is_empty() {
            table.add_row(vec![Cell::new("No change entries recorded")]);
            return table;
        }
        table.set_header(header(
            options,
            &["Change", "Author", "State", "Change log", "Execution", "Timestamp", "ms"],
        ));
        for entry in &self.0 {
            table.add_row(vec![
                Cell::new(&entry.change_id),
                Cell::new(&entry.author),
                state_cell(entry.state, options),
                Cell::new(&entry.change_log_class),
                Cell::new(&entry.execution_id),
                Cell::new(entry.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()),
                Cell::new(entry.execution_millis.to_string()),
            ]);
        }
        table
    }

    fn to_compact(&self) -> String {
        self.0
            .iter()
            .map(|e| {
                let state = e.state.map_or_else(|| "-".to_string(), |s| s.to_string());
                format!("{} {} {state}", e.change_id, e.author)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One entry shown as key/value rows.
#[derive(Serialize)]
#[serde(transparent)]
pub struct EntryView(pub ChangeEntry);

impl TableDisplay for EntryView {
    fn to_table(&self, options: &GlobalOptions) -> Table {
        let entry = &self.0;
        let mut table = themed_table(options);
        let rows: Vec<(&str, String)> = vec![
            ("changeId", entry.change_id.clone()),
            ("executionId", entry.execution_id.clone()),
            ("author", entry.author.clone()),
            ("changeLogClass", entry.change_log_class.clone()),
            ("changeSetMethod", entry.change_set_method.clone()),
            ("type", format!("{:?}", entry.change_type)),
            ("timestamp", entry.timestamp.to_rfc3339()),
            ("executionMillis", entry.execution_millis.to_string()),
            ("executionHostname", entry.execution_hostname.clone()),
            ("systemChange", entry.system_change.to_string()),
        ];
        table.add_row(vec![Cell::new("state").add_attribute(Attribute::Bold), state_cell(entry.state, options)]);
        for (key, value) in rows {
            table.add_row(vec![Cell::new(key).add_attribute(Attribute::Bold), Cell::new(value)]);
        }
        if let Some(trace) = &entry.error_trace {
            table.add_row(vec![Cell::new("errorTrace").add_attribute(Attribute::Bold), Cell::new(trace)]);
        }
        if let Some(metadata) = &entry.metadata {
            table.add_row(vec![
                Cell::new("metadata").add_attribute(Attribute::Bold),
                Cell::new(serde_json::to_string_pretty(metadata).unwrap_or_default()),
            ]);
        }
        table
    }

    fn to_compact(&self) -> String {
        EntriesView(vec![self.0.clone()]).to_compact()
    }
}

/// Current lock record plus whether its lease is still running.
#[derive(Serialize)]
pub struct LockView {
    #[serde(flatten)]
    pub entry: LockEntry,
    pub active: bool,
}

impl LockView {
    pub fn new(entry: LockEntry) -> Self {
        let active = entry.is_active_at(Utc::now());
        Self { entry, active }
    }

    fn status_label(&self) -> &'static str {
        if self.active { "HELD" } else { "FREE" }
    }
}

impl TableDisplay for LockView {
    fn to_table(&self, options: &GlobalOptions) -> Table {
        let mut table = themed_table(options);
        let status = Cell::new(self.status_label());
        let status = if options.no_color {
            status
        } else if self.active {
            status.fg(table_color(THEME.warning))
        } else {
            status.fg(table_color(THEME.success))
        };
        table.add_row(vec![Cell::new("lock").add_attribute(Attribute::Bold), status]);
        let rows = [
            ("key", self.entry.key.clone()),
            ("owner", self.entry.owner.clone()),
            ("recorded", format!("{:?}", self.entry.status)),
            ("expiresAt", self.entry.expires_at.to_rfc3339()),
        ];
        for (key, value) in rows {
            table.add_row(vec![Cell::new(key).add_attribute(Attribute::Bold), Cell::new(value)]);
        }
        table
    }

    fn to_compact(&self) -> String {
        format!(
            "{} {} {} {}",
            self.entry.key,
            self.status_label(),
            self.entry.owner,
            self.entry.expires_at.to_rfc3339()
        )
    }
}
