//! Pod, build, service and imagestream queries against one namespace.
//!
//! Polling methods never fail: an `oc` error inside a loop counts as "not ready yet".

use std::io::{self, Write};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use super::models::{ImageStream, ImageStreamList, PodList, RouteList, Service};
use super::OcClient;
use crate::errors::Result;
use crate::poll::{poll_for, poll_until, Backoff};

pub const POD_POLL_CYCLES: u32 = 180;
pub const POD_READY_CYCLES: u32 = 180;

fn progress_dot() {
    print!(".");
    let _ = io::stdout().flush();
}

/// Pods whose name contains `prefix`, excluding deploy and build pods.
pub fn count_app_pods(pods: &PodList, prefix: &str) -> usize {
    pods.items
        .iter()
        .map(|p| p.name())
        .filter(|n| n.contains(prefix) && !n.contains("deploy") && !n.contains("build"))
        .count()
}

#[derive(Debug, Clone)]
pub struct OpenShiftOperations {
    oc: OcClient,
    namespace: String,
    pod_name_prefix: String,
    pod_json_data: Option<PodList>,
    build_failed: bool,
    poll_interval: Duration,
}

impl OpenShiftOperations {
    pub fn new(oc: OcClient, pod_name_prefix: impl Into<String>) -> Self {
        Self {
            oc,
            namespace: String::new(),
            pod_name_prefix: pod_name_prefix.into(),
            pod_json_data: None,
            build_failed: false,
            poll_interval: Duration::from_secs(3),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn set_namespace(&mut self, namespace: impl Into<String>) {
        self.namespace = namespace.into();
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn pod_name_prefix(&self) -> &str {
        &self.pod_name_prefix
    }

    pub fn set_pod_name_prefix(&mut self, prefix: impl Into<String>) {
        self.pod_name_prefix = prefix.into();
    }

    /// Set once a build pod ended in `Failed`.
    pub fn build_failed(&self) -> bool {
        self.build_failed
    }

    /// Last pod list fetched by a polling method.
    pub fn pod_json_data(&self) -> Option<&PodList> {
        self.pod_json_data.as_ref()
    }

    fn ns(&self) -> Option<&str> {
        Some(self.namespace.as_str())
    }

    fn pause(&self) {
        if !self.poll_interval.is_zero() {
            thread::sleep(self.poll_interval);
        }
    }

    pub fn get_pod_status(&self) -> Result<PodList> {
        self.oc.get_json("get pods", self.ns())
    }

    fn refresh_pods(&mut self) -> bool {
        match self.get_pod_status() {
            Ok(pods) => {
                self.pod_json_data = Some(pods);
                true
            }
            Err(e) => {
                debug!("get pods failed: {e}");
                false
            }
        }
    }

    pub fn print_get_status(&self) {
        println!("Print get all and status:");
        for cmd in ["get all", "status", "status --suggest"] {
            println!("{}", self.oc.run_oc_command_ignore_error(cmd, self.ns(), false));
        }
    }

    pub fn print_pod_logs(&mut self) {
        self.refresh_pods();
        println!("Print all pod logs");
        let names: Vec<String> = self
            .pod_json_data
            .iter()
            .flat_map(|p| p.items.iter().map(|i| i.name().to_string()))
            .collect();
        for name in names {
            println!("Logs from pod name {name}:");
            println!(
                "{}",
                self.oc
                    .run_oc_command_ignore_error(&format!("logs pod/{name}"), self.ns(), false)
            );
        }
    }

    pub fn is_project_exists(&self) -> bool {
        match self.oc.run_oc_command("projects", None, false) {
            Ok(out) => out.contains(&self.namespace),
            Err(e) => {
                warn!("oc projects failed: {e}");
                false
            }
        }
    }

    /// Application pods in the last fetched pod list.
    pub fn get_pod_count(&self) -> usize {
        self.pod_json_data
            .as_ref()
            .map_or(0, |p| count_app_pods(p, &self.pod_name_prefix))
    }

    pub fn get_logs(&self, pod_name: &str) -> Result<String> {
        self.oc
            .run_oc_command(&format!("logs {pod_name}"), self.ns(), false)
    }

    /// Running, non-deploy pod matching the prefix, when exactly one app pod exists.
    fn running_app_pod(&self) -> Option<String> {
        if self.get_pod_count() != 1 {
            return None;
        }
        self.pod_json_data.as_ref().and_then(|pods| {
            pods.items
                .iter()
                .filter(|p| p.name().contains(&self.pod_name_prefix) && !p.name().contains("deploy"))
                .find(|p| p.phase() == "Running")
                .map(|p| p.name().to_string())
        })
    }

    fn announce_running(&self, pod_name: &str) {
        println!("\nPod with name {pod_name} is running.");
        match self.get_logs(pod_name) {
            Ok(out) => println!("{out}"),
            Err(e) => warn!("cannot read logs of {pod_name}: {e}"),
        }
    }

    /// Wait until exactly one application pod matching the prefix is `Running`.
    pub fn is_pod_running(&mut self, pod_name_prefix: &str, loops: u32) -> bool {
        println!("Check for POD is running {pod_name_prefix}");
        if pod_name_prefix.is_empty() && self.pod_name_prefix.is_empty() {
            println!("\nApplication pod name is not specified. Call: is_pod_running(pod_name_prefix=\"something\").");
            return false;
        }
        if !pod_name_prefix.is_empty() {
            self.pod_name_prefix = pod_name_prefix.to_string();
        }
        let interval = self.poll_interval;
        let running = poll_for(loops, Backoff::Fixed(interval), |_| {
            progress_dot();
            if !self.refresh_pods() {
                return None;
            }
            self.running_app_pod()
        });
        match running {
            Some(name) => {
                self.announce_running(&name);
                self.pause();
                true
            }
            None => {
                println!("is_pod_running failed. See logs for debugging.");
                self.print_get_status();
                self.print_pod_logs();
                false
            }
        }
    }

    pub fn is_build_pod_present(&self) -> bool {
        self.pod_json_data
            .as_ref()
            .is_some_and(|p| p.items.iter().any(|i| i.name().contains("build")))
    }

    /// A pod matching the prefix and containing `pod_suffix_name` reached `Succeeded`.
    ///
    /// `Failed` sets `build_failed`, prints diagnostics and returns false.
    pub fn is_pod_finished(&mut self, pod_suffix_name: &str) -> bool {
        if self.pod_json_data.is_none() {
            self.refresh_pods();
        }
        let Some(pods) = self.pod_json_data.clone() else {
            return false;
        };
        for pod in &pods.items {
            progress_dot();
            let name = pod.name();
            if !name.contains(&self.pod_name_prefix) || !name.contains(pod_suffix_name) {
                continue;
            }
            match pod.phase() {
                "Failed" => {
                    println!("\nPod with {pod_suffix_name} finished with Failed. See logs.");
                    self.build_failed = true;
                    self.print_pod_logs();
                    self.print_get_status();
                    return false;
                }
                "Succeeded" => {
                    println!("\nPod with suffix {pod_suffix_name} is finished");
                    return true;
                }
                _ => {}
            }
        }
        false
    }

    /// One poll step of the build-pod wait: `Some(true)` finished, `Some(false)` failed, `None` keep waiting.
    fn build_pod_step(&mut self) -> Option<bool> {
        progress_dot();
        if !self.refresh_pods() {
            return None;
        }
        if self.pod_json_data.as_ref().is_some_and(|p| p.items.is_empty()) || !self.is_build_pod_present() {
            return None;
        }
        if self.is_pod_finished("build") {
            return Some(true);
        }
        self.build_failed.then_some(false)
    }

    pub fn is_build_pod_finished(&mut self, cycle_count: u32) -> bool {
        println!("Check if build pod is finished");
        let interval = self.poll_interval;
        let done = poll_for(cycle_count, Backoff::Fixed(interval), |_| self.build_pod_step()).unwrap_or(false);
        if done {
            println!("\nBuild pod is finished");
        }
        done
    }

    /// Wait for the build pod to succeed, then for the application pod to run.
    pub fn is_s2i_pod_running(&mut self, pod_name_prefix: &str, cycle_count: u32) -> bool {
        self.pod_name_prefix = pod_name_prefix.to_string();
        println!("Check if S2I build pod is running");
        if !self.is_build_pod_finished(cycle_count) {
            println!("\nBuild pod with name {pod_name_prefix} was not finished.");
            return false;
        }
        println!("\nBuild pod with name {pod_name_prefix} is finished.");
        println!("Check if S2I pod is running.");
        if self.is_pod_running("", cycle_count) {
            println!("\nPod is running");
            return true;
        }
        println!("is_s2i_pod_running failed. See logs for debugging.");
        false
    }

    pub fn oc_get_services(&self, service_name: &str) -> Result<Service> {
        self.oc
            .get_json(&format!("get svc/{service_name}"), self.ns())
    }

    pub fn get_service_ip(&self, service_name: &str) -> Result<Option<String>> {
        Ok(self
            .oc_get_services(service_name)?
            .cluster_ip()
            .map(str::to_string))
    }

    /// The imagestream when a single `oc get is/<name>` reports it.
    pub fn is_imagestream_exist(&self, name: &str) -> Option<ImageStream> {
        let is = self.oc_get_is(name).ok()?;
        (is.kind == "ImageStream" && is.metadata.name == name).then_some(is)
    }

    pub fn get_routes(&self) -> Result<RouteList> {
        let out = self
            .oc
            .run_oc_command_ignore_error("get route", self.ns(), true);
        Ok(serde_json::from_str(&out)?)
    }

    pub fn oc_get_all_is(&self) -> Result<ImageStreamList> {
        self.oc.get_json("get is", self.ns())
    }

    pub fn oc_get_is(&self, name: &str) -> Result<ImageStream> {
        self.oc.get_json(&format!("get is/{name}"), self.ns())
    }

    /// True when imagestream `is_name` has a tag containing `version_to_check`.
    pub fn check_is_exists(&self, is_name: &str, version_to_check: &str) -> Result<bool> {
        Ok(self.oc_get_is(is_name)?.has_tag_containing(version_to_check))
    }

    /// Wait until the prefix pod finished and some non-deploy pod is `Running`.
    pub fn is_pod_ready(&mut self, cycle_count: u32) -> bool {
        println!("Check if pod is ready.");
        let interval = self.poll_interval;
        let prefix = self.pod_name_prefix.clone();
        let running = poll_for(cycle_count, Backoff::Fixed(interval), |_| {
            progress_dot();
            if !self.refresh_pods() {
                return None;
            }
            if self.pod_json_data.as_ref().is_some_and(|p| p.items.is_empty()) || !self.is_pod_finished(&prefix) {
                return None;
            }
            self.pod_json_data.as_ref().and_then(|pods| {
                pods.items
                    .iter()
                    .filter(|p| !p.name().contains("deploy"))
                    .find(|p| p.phase() == "Running")
                    .map(|p| p.name().to_string())
            })
        });
        match running {
            Some(name) => {
                self.announce_running(&name);
                self.pause();
                true
            }
            None => false,
        }
    }

    /// Poll `check` at the configured interval.
    pub(crate) fn poll(&self, attempts: u32, check: impl FnMut(u32) -> bool) -> bool {
        poll_until(attempts, Backoff::Fixed(self.poll_interval), check)
    }
}
