//! Container state queries and lifecycle commands.

use crate::errors::Result;

use super::ContainerEngine;

impl ContainerEngine {
    pub fn container_exists(&self, cid: &str) -> bool {
        self.output(&format!("ps -q -a -f 'id={cid}'"))
            .map(|o| !o.trim().is_empty())
            .unwrap_or(false)
    }

    pub fn container_running(&self, cid: &str) -> bool {
        self.inspect("{{.State.Running}}", cid)
            .map(|o| o == "true")
            .unwrap_or(false)
    }

    pub fn container_exit_code(&self, cid: &str) -> Result<String> {
        self.inspect("{{.State.ExitCode}}", cid)
    }

    pub fn container_ip(&self, cid: &str) -> Result<String> {
        self.inspect("{{.NetworkSettings.IPAddress}}", cid)
    }

    /// `NetworkSettings.IPAddress` from full `inspect` JSON, if present.
    pub fn inspect_ip_address(&self, cid: &str) -> Result<Option<String>> {
        let docs = self.inspect_json(cid)?;
        Ok(docs
            .first()
            .and_then(|d| d.pointer("/NetworkSettings/IPAddress"))
            .and_then(|v| v.as_str())
            .map(str::to_string))
    }

    /// `run <args>` returning captured output.
    pub fn run_container(&self, args: &str) -> Result<String> {
        self.output(&format!("run {args}"))
    }

    /// `exec <cid> <cmd>` returning captured output.
    pub fn exec(&self, cid: &str, cmd: &str) -> Result<String> {
        self.output(&format!("exec {cid} {cmd}"))
    }

    pub fn logs(&self, cid: &str) -> Result<String> {
        self.output(&format!("logs {cid}"))
    }

    pub fn stop(&self, cid: &str) {
        self.output_ignore_error(&format!("stop {cid}"));
    }

    pub fn remove_with_volumes(&self, cid: &str) {
        self.output_ignore_error(&format!("rm -v {cid}"));
    }

    pub fn remove_force(&self, ids: &str) {
        self.output_ignore_error(&format!("rm -f {ids}"));
    }

    /// Space-separated ids of containers created from `image`.
    pub fn containers_from_image(&self, image: &str) -> Result<String> {
        self.output(&format!("ps -q -a -f ancestor={image}"))
            .map(|o| o.split_whitespace().collect::<Vec<_>>().join(" "))
    }
}
