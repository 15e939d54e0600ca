//! tracing subscriber setup.
//!
//! `CT_LOG` takes an `EnvFilter` directive (default `info`). When a work directory is
//! given, every event at debug level or above is also appended to `<work_dir>/cci.log`.

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use once_cell::sync::OnceCell;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::errors::Result;

pub const LOG_ENV: &str = "CT_LOG";
pub const LOG_FILE_NAME: &str = "cci.log";

static INIT: OnceCell<()> = OnceCell::new();

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the global subscriber once; later calls are no-ops.
pub fn init(default_level: &str, work_dir: Option<&Path>) -> Result<()> {
    INIT.get_or_try_init(|| {
        let file_layer = match work_dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(dir.join(LOG_FILE_NAME))?;
                Some(
                    fmt::layer()
                        .with_ansi(false)
                        .with_target(false)
                        .with_writer(Mutex::new(file))
                        .with_filter(LevelFilter::DEBUG),
                )
            }
            None => None,
        };
        let stderr_layer = fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(env_filter(default_level));
        // Another subscriber (e.g. from a test harness) may already be installed.
        let _ = tracing_subscriber::registry()
            .with(stderr_layer)
            .with(file_layer)
            .try_init();
        Ok(())
    })
    .map(|_| ())
}
