#![allow(clippy::module_name_repetitions)]
//! Container engine discovery.

use std::io;
use std::path::PathBuf;

use which::which;

use crate::config::Settings;

/// Engines probed in order when `CONTAINER_ENGINE` is not set.
pub const ENGINE_CANDIDATES: [&str; 2] = ["podman", "docker"];

/// Resolve the engine binary: explicit setting first, then podman, then docker.
pub fn container_runtime_path(settings: &Settings) -> io::Result<PathBuf> {
    // CT_SKIP_ENGINE=1
    if settings.skip_engine {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            "Container engine disabled by environment override.",
        ));
    }

    if let Some(ref engine) = settings.container_engine {
        return which(engine).map_err(|_| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("Container engine '{engine}' was not found in PATH."),
            )
        });
    }

    for candidate in ENGINE_CANDIDATES {
        if let Ok(p) = which(candidate) {
            return Ok(p);
        }
    }
    Err(io::Error::new(
        io::ErrorKind::NotFound,
        "A container engine (podman or docker) is required but was not found in PATH.",
    ))
}

/// Program name to prefix engine commands with.
///
/// Falls back to `podman` when nothing is installed so command strings stay predictable.
pub fn engine_program(settings: &Settings) -> String {
    if let Some(ref engine) = settings.container_engine {
        return engine.clone();
    }
    container_runtime_path(settings)
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| ENGINE_CANDIDATES[0].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_engine_reports_not_found() {
        let settings = Settings {
            skip_engine: true,
            ..Settings::default()
        };
        let err = container_runtime_path(&settings).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_explicit_engine_name_is_used() {
        let settings = Settings {
            container_engine: Some("docker".into()),
            ..Settings::default()
        };
        assert_eq!(engine_program(&settings), "docker");
    }

    #[test]
    fn test_missing_explicit_engine_is_not_found() {
        let settings = Settings {
            container_engine: Some("definitely-not-an-engine-xyz".into()),
            ..Settings::default()
        };
        let err = container_runtime_path(&settings).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
