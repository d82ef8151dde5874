//! logger.rs
//!
//! Leveled stderr logging for the CLI.

use chrono::Local;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Success,
    Warn,
    Error,
}

pub fn log(level: LogLevel, msg: impl AsRef<str>) {
    let tag = match level {
        LogLevel::Info => "INFO",
        LogLevel::Success => "OK  ",
        LogLevel::Warn => "WARN",
        LogLevel::Error => "ERR ",
    };
    eprintln!("{} {tag} {}", Local::now().format("%H:%M:%S"), msg.as_ref());
}
