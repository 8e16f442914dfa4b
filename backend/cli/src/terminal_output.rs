//! Terminal output for the read-only commands: notes and plain-text tables.

use chrono::{DateTime, Utc};

use pacer_core::RunStatus;

pub const RESET: &str = "\x1b[0m";
pub const BOLD: &str = "\x1b[1m";
pub const DIM: &str = "\x1b[2m";
pub const RED: &str = "\x1b[31m";
pub const GREEN: &str = "\x1b[32m";
pub const YELLOW: &str = "\x1b[33m";
pub const CYAN: &str = "\x1b[36m";

/// Honours `NO_COLOR` and dumb terminals.
pub fn supports_color() -> bool {
    std::env::var("NO_COLOR").is_err()
        && (std::env::var("COLORTERM").is_ok()
            || std::env::var("TERM").is_ok_and(|t| t != "dumb"))
}

fn paint(style: &str, text: &str) -> String {
    if supports_color() {
        format!("{style}{text}{RESET}")
    } else {
        text.to_string()
    }
}

/// Remove ANSI escape sequences so widths reflect visible characters.
pub fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            chars.by_ref().find(|&next| next == 'm');
        } else {
            out.push(c);
        }
    }
    out
}

fn visible_width(s: &str) -> usize {
    strip_ansi(s).chars().count()
}

pub fn note_success(msg: &str) {
    if supports_color() {
        println!("{GREEN}{BOLD}✓{RESET} {msg}");
    } else {
        println!("OK: {msg}");
    }
}

pub fn note_warn(msg: &str) {
    if supports_color() {
        println!("{YELLOW}{BOLD}⚠{RESET} {msg}");
    } else {
        println!("WARN: {msg}");
    }
}

pub fn note_error(msg: &str) {
    if supports_color() {
        eprintln!("{RED}{BOLD}✗{RESET} {msg}");
    } else {
        eprintln!("ERROR: {msg}");
    }
}

/// Colored label for a task's last outcome.
pub fn run_status_cell(status: RunStatus) -> String {
    match status {
        RunStatus::Success => paint(GREEN, "success"),
        RunStatus::Failed => paint(RED, "failed"),
        RunStatus::None => paint(DIM, "never"),
    }
}

pub fn flag_cell(on: bool, label: &str) -> String {
    if on {
        paint(CYAN, label)
    } else {
        paint(DIM, "-")
    }
}

/// `YYYY-MM-DD HH:MM` in UTC, or `-`.
pub fn time_cell(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Cut `s` to `max` visible characters, ending in `…` when shortened.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut cut: String = s.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

#[derive(Clone, Copy)]
pub enum Align {
    Left,
    Right,
}

/// Column-aligned table with a bold header and a dashed rule.
#[derive(Default)]
pub struct Table {
    headers: Vec<(String, Align)>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(mut self, header: &str, align: Align) -> Self {
        self.headers.push((header.to_string(), align));
        self
    }

    pub fn row(&mut self, cells: Vec<String>) {
        self.rows.push(cells);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn render(&self) -> String {
        let mut widths: Vec<usize> = self.headers.iter().map(|(h, _)| visible_width(h)).collect();
        for row in &self.rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(visible_width(cell));
            }
        }

        let line = |cells: &[String]| -> String {
            let padded: Vec<String> = self
                .headers
                .iter()
                .zip(&widths)
                .enumerate()
                .map(|(i, ((_, align), width))| {
                    let cell = cells.get(i).map(String::as_str).unwrap_or("");
                    let pad = " ".repeat(width.saturating_sub(visible_width(cell)));
                    match align {
                        Align::Left => format!("{cell}{pad}"),
                        Align::Right => format!("{pad}{cell}"),
                    }
                })
                .collect();
            padded.join("  ").trim_end().to_string()
        };

        let header: Vec<String> = self.headers.iter().map(|(h, _)| h.clone()).collect();
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();

        let mut out = paint(BOLD, &line(&header));
        out.push('\n');
        out.push_str(&rule.join("  "));
        out.push('\n');
        for row in &self.rows {
            out.push_str(&line(row));
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_ansi_sequences() {
        assert_eq!(strip_ansi(&format!("{RED}failed{RESET}")), "failed");
    }

    #[test]
    fn table_aligns_on_visible_width() {
        let mut table = Table::new()
            .column("Name", Align::Left)
            .column("Runs", Align::Right);
        table.row(vec![format!("{GREEN}import{RESET}"), "12".into()]);
        table.row(vec!["ratings".into(), "3".into()]);

        let plain = strip_ansi(&table.render());
        let lines: Vec<&str> = plain.lines().collect();
        assert_eq!(lines[0], "Name     Runs");
        assert_eq!(lines[1], "-------  ----");
        assert_eq!(lines[2], "import     12");
        assert_eq!(lines[3], "ratings     3");
    }

    #[test]
    fn truncates_long_names() {
        assert_eq!(truncate("Daily meetings import", 10), "Daily mee…");
        assert_eq!(truncate("short", 10), "short");
    }
}
