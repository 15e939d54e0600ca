#![allow(clippy::module_name_repetitions)]
//! Container engine (podman/docker) command construction.
//!
//! Every operation formats `<engine> <subcommand ...>` and hands it to the shared
//! `CommandRunner`; nothing here talks to the engine API directly.

pub mod containers;
pub mod images;
pub mod runtime;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Settings;
use crate::errors::Result;
use crate::util::exec::{CommandRunner, ExecOutput, ExecRequest, ShellRunner};

pub use runtime::{container_runtime_path, engine_program};

/// Build timeout applied to `build` invocations.
pub const BUILD_TIMEOUT: Duration = Duration::from_secs(10 * 60);

#[derive(Clone)]
pub struct ContainerEngine {
    program: String,
    runner: Arc<dyn CommandRunner>,
}

impl fmt::Debug for ContainerEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerEngine")
            .field("program", &self.program)
            .finish()
    }
}

impl ContainerEngine {
    pub fn new(program: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            program: program.into(),
            runner,
        }
    }

    /// Engine discovered from settings, driven by a `ShellRunner`.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(engine_program(settings), Arc::new(ShellRunner::new()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    /// Full command line for an engine subcommand.
    pub fn command_line(&self, cmd: &str) -> String {
        format!("{} {}", self.program, cmd)
    }

    pub fn run_request(&self, request: ExecRequest) -> Result<ExecOutput> {
        self.runner.run(request)
    }

    /// Captured output; errors on non-zero exit.
    pub fn output(&self, cmd: &str) -> Result<String> {
        self.runner.output(&self.command_line(cmd))
    }

    pub fn output_ignore_error(&self, cmd: &str) -> String {
        self.runner.output_ignore_error(&self.command_line(cmd))
    }

    /// Inherited stdio; errors on non-zero exit.
    pub fn check(&self, cmd: &str) -> Result<()> {
        self.runner.check(&self.command_line(cmd))
    }

    pub fn status(&self, cmd: &str) -> i32 {
        self.runner.status(&self.command_line(cmd))
    }

    /// `inspect -f '<field>' <target>`, trimmed.
    pub fn inspect(&self, field: &str, target: &str) -> Result<String> {
        self.output(&format!("inspect -f '{field}' {target}"))
            .map(|s| s.trim().to_string())
    }

    /// `inspect <target>` parsed as the JSON array the engine prints.
    pub fn inspect_json(&self, target: &str) -> Result<Vec<serde_json::Value>> {
        let out = self.output(&format!("inspect {target}"))?;
        Ok(serde_json::from_str(&out)?)
    }
}
