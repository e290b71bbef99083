use anyhow::Result;
use chrono::{DateTime, Utc};
use colored::*;
use serde::Serialize;
use unicode_width::UnicodeWidthChar;
use crate::i18n::I18n;
use crate::matcher::CommandMatcher;
use crate::query::QueryResults;
use crate::storage::{ExecutedCommand, RankedCommand};

const MAX_COMMAND_WIDTH: usize = 120;

/// Everything the terminal output needs for one result.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct DisplayRow {
    pub ok: bool,
    pub command: String,
    pub description: Option<String>,
    pub cwd: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<i64>,
}

impl DisplayRow {
    fn from_command(cmd: &ExecutedCommand, unknown: &str) -> Self {
        Self {
            ok: !cmd.is_error,
            command: cmd.command.clone(),
            description: cmd.description.clone(),
            cwd: cmd.cwd.clone().unwrap_or_else(|| unknown.to_string()),
            timestamp: format_time(cmd.timestamp, unknown),
            frequency: None,
        }
    }

    fn from_ranked(ranked: &RankedCommand, unknown: &str) -> Self {
        let mut row = Self::from_command(&ranked.aggregate.latest, unknown);
        row.timestamp = format_time(ranked.aggregate.last_run, unknown);
        row.frequency = Some(ranked.aggregate.frequency);
        row
    }
}

pub fn display_rows(results: &QueryResults, i18n: &I18n) -> Vec<DisplayRow> {
    let unknown = i18n.t("unknown");
    match results {
        QueryResults::Plain { commands, .. } => commands
            .iter()
            .map(|c| DisplayRow::from_command(c, &unknown))
            .collect(),
        QueryResults::Ranked { commands, .. } => commands
            .iter()
            .map(|c| DisplayRow::from_ranked(c, &unknown))
            .collect(),
    }
}

pub fn render_rows(rows: &[DisplayRow], matcher: Option<&CommandMatcher>, i18n: &I18n) -> String {
    let mut output = String::new();
    for row in rows {
        let status = if row.ok {
            format!("[{}]", i18n.t("status_ok")).green()
        } else {
            format!("[{}]", i18n.t("status_error")).red()
        };
        let command = truncate_to_width(&row.command, MAX_COMMAND_WIDTH);
        let command = match matcher {
            Some(m) => m.highlight(&command),
            None => command.bold().to_string(),
        };

        output.push_str(&format!("{} {}", status, command));
        // A single run is the common case and not worth a badge.
        if let Some(n) = row.frequency.filter(|n| *n > 1) {
            output.push_str(&format!(" {}", i18n.t_format("runs", &[&n.to_string()]).yellow()));
        }
        output.push('\n');

        let mut detail = format!("    {}  {}", row.timestamp, row.cwd);
        if let Some(desc) = row.description.as_deref().filter(|d| !d.is_empty()) {
            detail.push_str(&format!("  # {}", truncate_to_width(desc, MAX_COMMAND_WIDTH)));
        }
        output.push_str(&format!("{}\n", detail.dimmed()));
    }
    output
}

pub fn render_json(rows: &[DisplayRow], total: usize) -> Result<String> {
    #[derive(Serialize)]
    struct Output<'a> {
        total: usize,
        results: &'a [DisplayRow],
    }
    Ok(serde_json::to_string_pretty(&Output { total, results: rows })?)
}

fn format_time(ts: Option<DateTime<Utc>>, unknown: &str) -> String {
    match ts {
        Some(ts) => ts
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        None => unknown.to_string(),
    }
}

/// First line of `text`, cut to at most `max` terminal columns.
pub fn truncate_to_width(text: &str, max: usize) -> String {
    let first_line = text.lines().next().unwrap_or("");
    let multiline = first_line.len() < text.trim_end().len();

    let full_width: usize = first_line.chars().map(|ch| ch.width().unwrap_or(0)).sum();
    if full_width <= max && !multiline {
        return first_line.to_string();
    }

    let mut width = 0;
    let mut out = String::new();
    for ch in first_line.chars() {
        let w = ch.width().unwrap_or(0);
        if width + w > max.saturating_sub(1) {
            out.push('…');
            return out;
        }
        width += w;
        out.push(ch);
    }
    if multiline {
        out.push('…');
    }
    out
}
