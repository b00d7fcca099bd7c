//! # Terminal Output
//!
//! Status markers for command output. Markers are emoji when color is in use
//! and bracketed words otherwise, so output stays greppable in pipelines.
//!
//! Color is chosen by the global `--color=always|never|auto` flag. In auto
//! mode it is off when `NO_COLOR` is set, `CLICOLOR=0`, `TERM=dumb`, or
//! stdout is not a terminal, unless `CLICOLOR_FORCE` is set.

use std::env;

use console::style;

use crate::lint::LintFinding;

#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub use_color: bool,
}

impl OutputConfig {
    /// Builds the configuration from the `--color` flag value.
    pub fn from_env_and_flag(color_flag: &str) -> Self {
        let use_color = match color_flag.to_lowercase().as_str() {
            "always" => true,
            "never" => false,
            _ => Self::detect_color_support(),
        };
        Self { use_color }
    }

    fn detect_color_support() -> bool {
        if env::var_os("NO_COLOR").is_some() {
            return false;
        }
        if env::var("CLICOLOR").is_ok_and(|v| v == "0") {
            return false;
        }
        if env::var("CLICOLOR_FORCE").is_ok_and(|v| v != "0" && !v.is_empty()) {
            return true;
        }
        if env::var("TERM").is_ok_and(|v| v == "dumb") {
            return false;
        }
        console::Term::stdout().features().colors_supported()
    }

    pub fn plain() -> Self {
        Self { use_color: false }
    }

    /// Prefix for a line of the given status.
    pub fn marker(&self, status: Status) -> String {
        if !self.use_color {
            return status.plain().to_string();
        }
        match status {
            Status::Ok => style(status.emoji()).green().to_string(),
            Status::Warn => style(status.emoji()).yellow().to_string(),
            Status::Error => style(status.emoji()).red().to_string(),
            Status::Info => status.emoji().to_string(),
        }
    }

    /// One line per finding, prefixed with `status`.
    pub fn findings(&self, status: Status, findings: &[LintFinding]) -> Vec<String> {
        let marker = self.marker(status);
        findings
            .iter()
            .map(|f| format!("{} {}", marker, f))
            .collect()
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self::from_env_and_flag("auto")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Warn,
    Error,
    Info,
}

impl Status {
    fn emoji(self) -> &'static str {
        match self {
            Status::Ok => "✅",
            Status::Warn => "⚠️",
            Status::Error => "❌",
            Status::Info => "🔍",
        }
    }

    fn plain(self) -> &'static str {
        match self {
            Status::Ok => "[OK]",
            Status::Warn => "[WARN]",
            Status::Error => "[ERR]",
            Status::Info => "[INFO]",
        }
    }
}
