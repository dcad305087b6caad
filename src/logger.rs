/// Set to false to hide time in logs
const LOG_SHOW_TIME: bool = true;

/// Fixed column widths so log lines stay aligned
const TAG_WIDTH: usize = 9;
const LEVEL_WIDTH: usize = 7;

use chrono::Local;
use colored::*;

/// Log tags for categorizing log messages.
#[derive(Debug)]
pub enum LogTag {
    Collector,
    Store,
    Strategy,
    Analyzer,
    System,
    Other(String),
}

/// Logs a message with time, tag and level.
pub fn log(tag: LogTag, level: &str, message: &str) {
    let prefix = if LOG_SHOW_TIME {
        format!("{} ", Local::now().format("%H:%M:%S"))
            .dimmed()
            .to_string()
    } else {
        String::new()
    };

    let tag_str = match tag {
        LogTag::Collector => format!("{:<width$}", "COLLECTOR", width = TAG_WIDTH)
            .bright_cyan()
            .bold(),
        LogTag::Store => format!("{:<width$}", "STORE", width = TAG_WIDTH)
            .bright_magenta()
            .bold(),
        LogTag::Strategy => format!("{:<width$}", "STRATEGY", width = TAG_WIDTH)
            .bright_green()
            .bold(),
        LogTag::Analyzer => format!("{:<width$}", "ANALYZER", width = TAG_WIDTH)
            .bright_blue()
            .bold(),
        LogTag::System => format!("{:<width$}", "SYSTEM", width = TAG_WIDTH)
            .bright_yellow()
            .bold(),
        LogTag::Other(ref s) => format!("{:<width$}", s, width = TAG_WIDTH).white().bold(),
    };

    let level_str = match level.to_uppercase().as_str() {
        "ERROR" => format!("{:<width$}", level, width = LEVEL_WIDTH)
            .bright_red()
            .bold(),
        "WARN" | "WARNING" => format!("{:<width$}", level, width = LEVEL_WIDTH)
            .bright_yellow()
            .bold(),
        "SUCCESS" => format!("{:<width$}", level, width = LEVEL_WIDTH)
            .bright_green()
            .bold(),
        "INFO" => format!("{:<width$}", level, width = LEVEL_WIDTH)
            .bright_blue()
            .bold(),
        "DEBUG" => format!("{:<width$}", level, width = LEVEL_WIDTH)
            .bright_black()
            .bold(),
        _ => format!("{:<width$}", level, width = LEVEL_WIDTH).white().bold(),
    };

    println!("{}[{}] [{}] {}", prefix, tag_str, level_str, message.bright_white());
}
