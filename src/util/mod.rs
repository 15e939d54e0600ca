#![allow(clippy::module_name_repetitions)]
//! Small utilities: shell escaping, random names, timestamps, file helpers.

pub mod exec;
pub mod fs;
pub mod id;

use chrono::Local;
use std::time::{Duration, SystemTime};

pub use exec::{CommandRunner, ExecOutput, ExecRequest, OutputMode, ShellRunner};
pub use id::random_string;

/// Separator line used in printed reports.
pub const LINE: &str = "==============================================";

pub fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        "''".to_string()
    } else if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_=./:@".contains(c))
    {
        s.to_string()
    } else {
        let escaped = s.replace('\'', "'\"'\"'");
        format!("'{}'", escaped)
    }
}

/// Join the non-blank parts with single spaces.
pub fn join_nonempty(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Seconds since the Unix epoch.
pub fn timestamp_s() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs() as i64
}

pub fn timestamp_pretty() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S%z").to_string()
}

/// `HH:MM:SS` between two epoch timestamps.
pub fn timestamp_diff(start: i64, end: i64) -> String {
    let diff = end - start;
    let hours = diff.div_euclid(3600);
    let rem = diff.rem_euclid(3600);
    format!("{:02}:{:02}:{:02}", hours, rem / 60, rem % 60)
}

/// `PATH`-style value with `dir` prepended (or `dir` alone when the value is empty).
pub fn path_prepend(current: &str, dir: &str) -> String {
    if current.is_empty() {
        dir.to_string()
    } else {
        format!("{dir}:{current}")
    }
}
