//! Helm chart packaging, installation and testing against the current OpenShift project.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use serde::Deserialize;
use tracing::{info, warn};

use crate::config::Timing;
use crate::errors::Result;
use crate::http::{insecure_client, REQUEST_TIMEOUT};
use crate::openshift::OpenShiftApi;
use crate::poll::{poll_for, poll_until, Backoff};
use crate::util::exec::CommandRunner;

pub const INSTALL_ATTEMPTS: u32 = 3;
pub const TEST_ATTEMPTS: u32 = 60;

/// `helm <cmd> [-o json]`.
pub fn helm_command_line(cmd: &str, json_output: bool) -> String {
    if json_output {
        format!("helm {cmd} -o json")
    } else {
        format!("helm {cmd}")
    }
}

/// Drop helm's `W...` warning lines and join the rest without separators.
pub fn strip_helm_warnings(output: &str) -> String {
    output
        .split('\n')
        .filter(|l| !l.starts_with('W'))
        .collect::<Vec<_>>()
        .concat()
}

/// Every string must appear in the output of `helm test --logs`, besides the release name,
/// `STATUS: deployed` and `Succeeded`.
pub fn check_test_output(output: &str, package_name: &str, expected: &[&str]) -> bool {
    let name = format!("NAME: {package_name}");
    let mut checks = vec![name.as_str(), "STATUS: deployed", "Succeeded"];
    checks.extend_from_slice(expected);
    println!("Strings to check in helm output log: {checks:?}");
    checks.iter().all(|c| output.contains(c))
}

/// `helm package` reported success for `tarball_name`.
pub fn is_package_success(output: &str, tarball_name: &str) -> bool {
    output.contains("Successfully packaged chart") && output.contains(tarball_name)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HelmRelease {
    pub name: String,
    pub chart: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ChartMetadata {
    version: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct InstalledChart {
    metadata: ChartMetadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ReleaseInfo {
    status: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InstallOutput {
    name: String,
    chart: InstalledChart,
    info: ReleaseInfo,
}

fn yaml_mapping(path: &Path) -> Result<serde_yaml::Mapping> {
    let body = fs::read_to_string(path)?;
    let value: serde_yaml::Value = serde_yaml::from_str(&body)?;
    Ok(match value {
        serde_yaml::Value::Mapping(m) => m,
        _ => serde_yaml::Mapping::new(),
    })
}

fn yaml_scalar(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[derive(Debug)]
pub struct HelmChartsApi {
    runner: Arc<dyn CommandRunner>,
    oc_api: OpenShiftApi,
    path: PathBuf,
    package_name: String,
    tarball_dir: PathBuf,
    version: String,
    cloned_dir: Option<PathBuf>,
    timing: Timing,
}

impl HelmChartsApi {
    /// Charts are read from `<path>/<package_name>/src`; packages land in `tarball_dir`.
    pub fn new(
        path: impl Into<PathBuf>,
        package_name: impl Into<String>,
        tarball_dir: impl Into<PathBuf>,
        oc_api: OpenShiftApi,
        timing: Timing,
    ) -> Self {
        Self {
            runner: oc_api.oc().runner().clone(),
            oc_api,
            path: path.into(),
            package_name: package_name.into(),
            tarball_dir: tarball_dir.into(),
            version: String::new(),
            cloned_dir: None,
            timing,
        }
    }

    pub fn oc_api(&self) -> &OpenShiftApi {
        &self.oc_api
    }

    pub fn oc_api_mut(&mut self) -> &mut OpenShiftApi {
        &mut self.oc_api
    }

    pub fn namespace(&self) -> &str {
        self.oc_api.namespace()
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn set_version(&mut self, version: impl Into<String>) {
        self.version = version.into();
    }

    pub fn run_helm_command(&self, cmd: &str, json_output: bool) -> Result<String> {
        let line = helm_command_line(cmd, json_output);
        println!("run_helm_command: {line}");
        self.runner.output(&line)
    }

    pub fn full_package_dir(&self) -> PathBuf {
        self.path.join(&self.package_name).join("src")
    }

    pub fn tarball_name(&self) -> String {
        format!("{}-{}.tgz", self.package_name, self.version)
    }

    pub fn full_tarball_path(&self) -> PathBuf {
        self.tarball_dir.join(self.tarball_name())
    }

    /// Clone the charts repository into a scratch dir and read charts from it (or its `subdir`).
    pub fn clone_helm_chart_repo(&mut self, repo_url: &str, repo_name: &str, subdir: &str) -> Result<()> {
        let temp_dir = tempfile::Builder::new()
            .prefix("helm-charts-")
            .tempdir()?
            .keep();
        let target = temp_dir.join(repo_name);
        let cmd = format!("git clone {repo_url} {}", target.display());
        println!("Clone charts repo by command: {cmd}");
        self.cloned_dir = Some(temp_dir);
        println!("{}", self.runner.output(&cmd)?);
        self.path = if subdir.is_empty() {
            target
        } else {
            target.join(subdir)
        };
        Ok(())
    }

    pub fn delete_project(&mut self) -> Result<()> {
        self.oc_api.delete_project()?;
        if let Some(dir) = self.cloned_dir.take() {
            if dir.exists() {
                fs::remove_dir_all(dir)?;
            }
        }
        Ok(())
    }

    fn chart_yaml(&self) -> PathBuf {
        self.full_package_dir().join("Chart.yaml")
    }

    fn values_yaml(&self) -> Result<serde_yaml::Mapping> {
        yaml_mapping(&self.full_package_dir().join("values.yaml"))
    }

    pub fn get_version_from_chart_yaml(&self) -> Result<Option<String>> {
        let chart = yaml_mapping(&self.chart_yaml())?;
        Ok(chart.get("appVersion").and_then(yaml_scalar))
    }

    pub fn is_registry_in_values_yaml(&self) -> Result<bool> {
        Ok(self.values_yaml()?.contains_key("registry"))
    }

    pub fn is_pvc_in_values_yaml(&self) -> Result<bool> {
        Ok(self.values_yaml()?.contains_key("pvc"))
    }

    pub fn get_name_from_values_yaml(&self) -> Result<Option<String>> {
        Ok(self.values_yaml()?.get("name").and_then(yaml_scalar))
    }

    pub fn is_chart_yaml_present(&self) -> bool {
        self.chart_yaml().exists()
    }

    pub fn is_pod_running(&mut self, pod_name_prefix: &str, loops: u32) -> bool {
        self.oc_api.ops_mut().is_pod_running(pod_name_prefix, loops)
    }

    pub fn is_s2i_pod_running(&mut self, pod_name_prefix: &str, cycle_count: u32) -> bool {
        self.oc_api
            .ops_mut()
            .is_s2i_pod_running(pod_name_prefix, cycle_count)
    }

    /// Package the chart sources into `<package>-<appVersion>.tgz`.
    pub fn helm_package(&mut self) -> Result<bool> {
        if !self.is_chart_yaml_present() {
            println!(
                "Chart.yaml file is not present in directory {}",
                self.full_package_dir().display()
            );
            return Ok(false);
        }
        self.version = self.get_version_from_chart_yaml()?.unwrap_or_default();
        let cmd = format!("package {}", self.full_package_dir().display());
        println!("Helm package command is: helm {cmd}");
        let output = self.run_helm_command(&cmd, false)?;
        println!("{output}");
        Ok(is_package_success(&output, &self.tarball_name()))
    }

    /// JSON output of `helm <command> -o json`; `None` when the command fails or prints no JSON.
    pub fn get_helm_json_output(&self, command: &str) -> Option<serde_json::Value> {
        let output = match self.run_helm_command(command, true) {
            Ok(o) => o,
            Err(e) => {
                println!("Helm command {command} failed. See {}", e.output());
                return None;
            }
        };
        match serde_json::from_str(&strip_helm_warnings(&output)) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("helm {command}: unparsable output: {e}");
                None
            }
        }
    }

    fn releases(&self) -> Vec<HelmRelease> {
        self.get_helm_json_output("list")
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    /// The release is listed as deployed with the expected chart version.
    pub fn check_helm_installation(&self) -> bool {
        let chart = format!("{}-{}", self.package_name, self.version);
        self.releases()
            .iter()
            .find(|r| r.name == self.package_name)
            .is_some_and(|r| r.chart == chart && r.status == "deployed")
    }

    pub fn is_helm_package_installed(&self) -> bool {
        self.releases().iter().any(|r| r.name == self.package_name)
    }

    pub fn helm_uninstallation(&self) -> Result<()> {
        let out = self.run_helm_command(
            &format!("uninstall {} -n {}", self.package_name, self.namespace()),
            false,
        )?;
        println!("{out}");
        Ok(())
    }

    /// Install the packaged chart with `--set key=value` overrides, reinstalling when present.
    pub fn helm_installation(&mut self, values: &[(&str, &str)]) -> Result<bool> {
        self.version = match self.get_version_from_chart_yaml()? {
            Some(v) if !v.is_empty() => v,
            _ => return Ok(false),
        };
        if self.is_helm_package_installed() {
            self.helm_uninstallation()?;
        }
        let mut command = format!(
            "install {} {}",
            self.package_name,
            self.full_tarball_path().display()
        );
        for (key, value) in values {
            command.push_str(&format!(" --set {key}={value}"));
        }
        let installed = poll_for(
            INSTALL_ATTEMPTS,
            Backoff::Fixed(self.timing.helm_retry),
            |_| {
                self.get_helm_json_output(&command)
                    .filter(|v| v.as_object().is_some_and(|o| !o.is_empty()))
            },
        );
        if !self.timing.helm_retry.is_zero() {
            thread::sleep(self.timing.helm_retry);
        }
        let Some(json) = installed else {
            return Ok(false);
        };
        let out: InstallOutput = serde_json::from_value(json)?;
        if out.name != self.package_name
            || out.chart.metadata.version != self.version
            || out.info.status != "deployed"
        {
            warn!(
                "unexpected install result: name={} version={} status={}",
                out.name, out.chart.metadata.version, out.info.status
            );
            return Ok(false);
        }
        if !self.check_helm_installation() {
            println!("Installation has failed. Let's uninstall it and try one more time.");
            return Ok(false);
        }
        Ok(true)
    }

    /// `helm test --logs` until the output carries every expected string.
    pub fn test_helm_chart(&mut self, expected: &[&str]) -> bool {
        let cmd = format!("test {} --logs", self.package_name);
        let ok = poll_until(TEST_ATTEMPTS, Backoff::Fixed(self.timing.helm_retry), |_| {
            match self.run_helm_command(&cmd, false) {
                Ok(output) => {
                    println!("Helm test output: {output}");
                    check_test_output(&output, &self.package_name, expected)
                }
                Err(_) => {
                    println!("Helm test command `{cmd}` failed. Let's try more time.");
                    false
                }
            }
        });
        if !ok {
            self.oc_api.ops().print_get_status();
        }
        ok
    }

    /// Host of route `route_name` in this namespace targeting the service of the same name.
    pub fn get_route_name(&self, route_name: &str) -> Result<Option<String>> {
        let routes = self.oc_api.ops().get_routes()?;
        let namespace = self.namespace();
        Ok(routes
            .items
            .into_iter()
            .find(|r| {
                r.metadata.namespace.as_deref() == Some(namespace)
                    && r.metadata.name == route_name
                    && r.spec.to.name == route_name
            })
            .map(|r| r.spec.host))
    }

    /// The first imagestream has tag `version` pulled from `registry`.
    pub fn check_imagestreams(&self, version: &str, registry: &str) -> Result<bool> {
        let streams = self.oc_api.ops().oc_get_all_is()?;
        let Some(first) = streams.items.first() else {
            return Ok(false);
        };
        for tag in first.tags() {
            let name = tag.name.as_deref().unwrap_or_default();
            let source = tag.from.as_ref().map(|f| f.name.as_str()).unwrap_or_default();
            println!("Important tags: {version}={name}, {registry}={source}");
            if name == version && source == registry {
                println!("Imagestream tag exists.");
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// GET `<schema><route host>[:port]` until it answers 200 with `expected` in the body.
    pub fn test_helm_curl_output(
        &self,
        route_name: &str,
        expected: &str,
        port: Option<u16>,
        schema: &str,
        range_count: u32,
    ) -> Result<bool> {
        if !self.timing.http_retry.is_zero() {
            thread::sleep(self.timing.http_retry);
        }
        let Some(host) = self.get_route_name(route_name)? else {
            println!("test_helm_curl_output: Route name is: None");
            return Ok(false);
        };
        println!("test_helm_curl_output: Route name is: {host}");
        let url = match port {
            Some(p) => format!("{schema}{host}:{p}"),
            None => format!("{schema}{host}"),
        };
        let client = insecure_client(REQUEST_TIMEOUT)?;
        let ok = poll_until(range_count, Backoff::Fixed(self.timing.http_retry), |_| {
            println!("test_helm_curl_output: requests.get {url}");
            let resp = match client.get(&url).send().and_then(|r| r.error_for_status()) {
                Ok(r) => r,
                Err(e) => {
                    println!("test_helm_curl_output: Service is not yet available ({e}). Let's wait some time");
                    return false;
                }
            };
            let status = resp.status().as_u16();
            let text = resp.text().unwrap_or_default();
            if status != 200 {
                println!("test_helm_curl_output response is different from 200: {text}, {status}");
                return false;
            }
            println!("test_helm_curl_output: text: {text}");
            if !text.contains(expected) {
                println!("{expected} is not in the output");
                return false;
            }
            true
        });
        if !ok {
            println!("test_helm_curl_output: Service was not available");
        }
        info!("helm curl check of {url}: {ok}");
        Ok(ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helm_command_line() {
        assert_eq!(helm_command_line("list", true), "helm list -o json");
        assert_eq!(helm_command_line("test pg --logs", false), "helm test pg --logs");
    }

    #[test]
    fn test_strip_helm_warnings() {
        let out = "WARNING: kube config is group-readable\n[{\"name\":\"pg\"}]\n";
        assert_eq!(strip_helm_warnings(out), "[{\"name\":\"pg\"}]");
    }

    #[test]
    fn test_check_test_output() {
        let out = "NAME: postgresql-persistent\nSTATUS: deployed\nPhase:          Succeeded\n\
                   POD LOGS: postgresql-persistent-connection-test\n\
                   postgresql-testing:5432 - accepting connections\n";
        assert!(check_test_output(out, "postgresql-persistent", &["accepting connections"]));
        assert!(!check_test_output(out, "postgresql-persistent", &["refused"]));
        assert!(!check_test_output(out, "mysql", &[]));
    }

    #[test]
    fn test_is_package_success() {
        let out = "Successfully packaged chart and saved it to: /tmp/postgresql-imagestreams-1.0.0.tgz";
        assert!(is_package_success(out, "postgresql-imagestreams-1.0.0.tgz"));
        assert!(!is_package_success(out, "postgresql-imagestreams-2.0.0.tgz"));
        assert!(!is_package_success("Error: no Chart.yaml", "x.tgz"));
    }
}
