//! Error mapping guide:
//! - A command that exits non-zero becomes `CiError::Process` carrying its combined output.
//! - Boolean checks (`is_*`, `assert_*`, `wait_*`) turn process errors into `false`; everything else propagates.
//! - Map io::ErrorKind::NotFound to exit code 127; process failures keep the child code; all others map to 1.
use std::io;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CiError>;

#[derive(Debug, Error)]
pub enum CiError {
    /// Command ran and exited with a non-zero status.
    #[error("command '{command}' failed with code {code}")]
    Process {
        command: String,
        code: i32,
        output: String,
    },

    #[error("command '{command}' timed out after {after:?}")]
    Timeout { command: String, after: Duration },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Message(String),
}

impl CiError {
    pub fn message(msg: impl Into<String>) -> Self {
        CiError::Message(msg.into())
    }

    /// Output captured from a failed command; empty for other kinds.
    pub fn output(&self) -> &str {
        match self {
            CiError::Process { output, .. } => output,
            _ => "",
        }
    }

    pub fn is_process_failure(&self) -> bool {
        matches!(self, CiError::Process { .. } | CiError::Timeout { .. })
    }
}

/// Map an io::Error to a process exit code:
/// - 127 for NotFound (command not found)
/// - 1 for all other errors
pub fn exit_code_for_io_error(e: &io::Error) -> i32 {
    if e.kind() == io::ErrorKind::NotFound {
        127
    } else {
        1
    }
}

/// Convert CiError to an exit code (parity with io::Error mapping).
pub fn exit_code_for_error(e: &CiError) -> i32 {
    match e {
        CiError::Io(ioe) => exit_code_for_io_error(ioe),
        CiError::Process { code, .. } => *code,
        CiError::Timeout { .. } => 124,
        CiError::NotFound(_) => 127,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let nf = CiError::Io(io::Error::new(io::ErrorKind::NotFound, "missing"));
        assert_eq!(exit_code_for_error(&nf), 127);
        let pe = CiError::Process {
            command: "false".into(),
            code: 3,
            output: "boom".into(),
        };
        assert_eq!(exit_code_for_error(&pe), 3);
        assert_eq!(pe.output(), "boom");
        assert_eq!(exit_code_for_error(&CiError::message("x")), 1);
    }

    #[test]
    fn test_process_error_display() {
        let pe = CiError::Process {
            command: "podman pull foo".into(),
            code: 125,
            output: String::new(),
        };
        assert_eq!(pe.to_string(), "command 'podman pull foo' failed with code 125");
        assert!(pe.is_process_failure());
    }
}
