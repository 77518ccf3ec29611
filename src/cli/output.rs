//! Output formatting utilities for the CLI.

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use console::style;
use serde::Serialize;
use std::env;

use crate::domain::models::{AgentStatus, EventSeverity, HealthStatus, TaskStatus};

pub trait CommandOutput: Serialize {
    fn to_human(&self) -> String;

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub fn output<T: CommandOutput>(result: &T, json_mode: bool) {
    if json_mode {
        println!("{}", serde_json::to_string_pretty(&result.to_json()).unwrap_or_default());
    } else {
        println!("{}", result.to_human());
    }
}

/// Truncate a string to at most `max_len` characters, appending "..." if truncated.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

/// Check if color output is supported
pub fn supports_color() -> bool {
    if env::var("NO_COLOR").is_ok() {
        return false;
    }
    env::var("TERM").as_deref() != Ok("dumb")
}

/// Table with a bold header row, sized to the terminal.
pub fn table<I, S>(headers: I) -> Table
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            headers
                .into_iter()
                .map(|h| Cell::new(h.into()).add_attribute(Attribute::Bold)),
        );
    table
}

pub fn status_cell(text: impl std::fmt::Display, color: Color) -> Cell {
    let cell = Cell::new(text.to_string());
    if supports_color() {
        cell.fg(color)
    } else {
        cell
    }
}

pub const fn agent_status_color(status: AgentStatus) -> Color {
    match status {
        AgentStatus::Idle => Color::Green,
        AgentStatus::Active | AgentStatus::Busy => Color::Cyan,
        AgentStatus::Initializing => Color::Yellow,
        AgentStatus::Error => Color::Red,
        AgentStatus::Terminating | AgentStatus::Terminated => Color::DarkGrey,
    }
}

pub const fn task_status_color(status: TaskStatus) -> Color {
    match status {
        TaskStatus::Completed => Color::Green,
        TaskStatus::Running => Color::Cyan,
        TaskStatus::Queued => Color::Yellow,
        TaskStatus::Pending => Color::White,
        TaskStatus::Failed => Color::Red,
        TaskStatus::Cancelled => Color::DarkGrey,
    }
}

/// Health status styled for a single line of terminal output.
pub fn styled_health(status: HealthStatus) -> String {
    let text = status.to_string();
    if !supports_color() {
        return text;
    }
    match status {
        HealthStatus::Healthy => style(text).green().to_string(),
        HealthStatus::Degraded => style(text).yellow().to_string(),
        HealthStatus::Unhealthy => style(text).red().bold().to_string(),
    }
}

pub fn styled_severity(severity: EventSeverity, text: &str) -> String {
    if !supports_color() {
        return text.to_string();
    }
    match severity {
        EventSeverity::Debug => style(text).dim().to_string(),
        EventSeverity::Info => text.to_string(),
        EventSeverity::Warning => style(text).yellow().to_string(),
        EventSeverity::Error | EventSeverity::Critical => style(text).red().to_string(),
    }
}
