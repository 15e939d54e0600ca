//! `oc` wrappers: a thin client plus pod/build polling (`ops`) and deployment flows (`api`).

pub mod api;
pub mod models;
pub mod ops;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::errors::Result;
use crate::util::exec::{CommandRunner, ExecRequest, OutputMode, ShellRunner};

pub use api::OpenShiftApi;
pub use models::{ImageStream, ImageStreamList, Pod, PodList, Route, RouteList, Service};
pub use ops::OpenShiftOperations;

/// `oc <cmd> [-n <namespace>] [-o json]`.
pub fn oc_command_line(cmd: &str, namespace: Option<&str>, json_output: bool) -> String {
    let mut line = format!("oc {cmd}");
    if let Some(ns) = namespace.filter(|ns| !ns.is_empty()) {
        line.push_str(" -n ");
        line.push_str(ns);
    }
    if json_output {
        line.push_str(" -o json");
    }
    line
}

#[derive(Debug, Clone)]
pub struct OcClient {
    runner: Arc<dyn CommandRunner>,
}

impl Default for OcClient {
    fn default() -> Self {
        Self::new(Arc::new(ShellRunner::new()))
    }
}

impl OcClient {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    pub fn run_oc_command(&self, cmd: &str, namespace: Option<&str>, json_output: bool) -> Result<String> {
        self.runner
            .output(&oc_command_line(cmd, namespace, json_output))
    }

    /// Output regardless of the exit code.
    pub fn run_oc_command_ignore_error(&self, cmd: &str, namespace: Option<&str>, json_output: bool) -> String {
        self.runner
            .output_ignore_error(&oc_command_line(cmd, namespace, json_output))
    }

    /// `-o json` output parsed into `T`; stderr warnings are kept out of the document.
    pub fn get_json<T: DeserializeOwned>(&self, cmd: &str, namespace: Option<&str>) -> Result<T> {
        let line = oc_command_line(cmd, namespace, true);
        let out = self
            .runner
            .run(ExecRequest::new(line).mode(OutputMode::Separate))?;
        if !out.stderr.trim().is_empty() {
            debug!("oc stderr: {}", out.stderr.trim_end());
        }
        Ok(serde_json::from_str(&out.output)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oc_command_line() {
        assert_eq!(oc_command_line("get pods", Some("sclorg-12345"), true), "oc get pods -n sclorg-12345 -o json");
        assert_eq!(oc_command_line("status", None, false), "oc status");
        assert_eq!(oc_command_line("projects", Some(""), false), "oc projects");
    }
}
