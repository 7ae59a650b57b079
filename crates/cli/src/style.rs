//! Shared styling utilities for the CLI.

use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

/// Create a success-styled string (green with checkmark).
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Create a warning-styled string (yellow).
pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

/// Create a header-styled string (bold, white).
pub fn header(msg: &str) -> String {
    let style = Style::new().bold();
    style.apply_to(msg).to_string()
}

/// Create a dim-styled string.
pub fn dim(msg: &str) -> String {
    let style = Style::new().dim();
    style.apply_to(msg).to_string()
}

/// Status indicator: shell alive (green dot).
pub fn shell_running(pid: u32) -> String {
    let style = Style::new().green();
    format!("{} Running (PID {})", style.apply_to("●"), pid)
}

/// Status indicator: shell gone (dim dot).
pub fn shell_stopped() -> String {
    let style = Style::new().dim();
    format!("{} Not running", style.apply_to("○"))
}

/// Colour one `git status --short` line by its index/worktree flags.
pub fn status_line(line: &str) -> String {
    let style = if line.starts_with("??") {
        Style::new().red()
    } else if line.starts_with(' ') {
        Style::new().yellow()
    } else {
        Style::new().green()
    };
    style.apply_to(line).to_string()
}

/// A steady-ticking spinner with `msg`.
pub fn spinner(msg: impl Into<String>) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.blue} {msg}") {
        spinner.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    spinner.set_message(msg.into());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}
