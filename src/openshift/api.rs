//! Project lifecycle and deployment flows on top of `OpenShiftOperations`.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{error, info, warn};

use super::models::{CommandAppPod, Route, COMMAND_APP_NAME};
use super::ops::{OpenShiftOperations, POD_POLL_CYCLES};
use super::OcClient;
use crate::config::Timing;
use crate::engine::ContainerEngine;
use crate::errors::{CiError, Result};
use crate::http::{download_template, get_response_request};
use crate::images::{get_service_image, get_tagged_image};
use crate::poll::{poll_until, Backoff};
use crate::util::fs::unique_path;
use crate::util::id::project_name;

pub const TEMPLATE_DIR: &str = "/var/tmp";
pub const DEFAULT_COMMAND_APP_IMAGE: &str = "registry.access.redhat.com/ubi8/ubi";
const IMAGE_REGISTRY_ROUTE: &str = "get route default-route -n openshift-image-registry";

static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]").expect("static regex"));

/// Parameters for probing an application from inside or outside the cluster.
#[derive(Debug, Clone)]
pub struct ResponseCheck {
    pub name_in_template: String,
    pub expected_output: String,
    pub port: u16,
    pub protocol: String,
    pub response_code: u16,
    pub max_tests: u32,
}

impl Default for ResponseCheck {
    fn default() -> Self {
        Self {
            name_in_template: String::new(),
            expected_output: String::new(),
            port: 8080,
            protocol: "http".to_string(),
            response_code: 200,
            max_tests: 20,
        }
    }
}

/// `-p A -p B` form of template arguments; empty for none.
pub fn openshift_args(args: &[&str]) -> String {
    if args.is_empty() {
        String::new()
    } else {
        format!("-p {}", args.join(" -p "))
    }
}

#[derive(Debug)]
pub struct OpenShiftApi {
    oc: OcClient,
    engine: ContainerEngine,
    ops: OpenShiftOperations,
    namespace: String,
    version: String,
    create_prj: bool,
    delete_prj: bool,
    timing: Timing,
    template_dir: PathBuf,
}

impl OpenShiftApi {
    /// Without `with_namespace`, `create_project` makes a fresh `sclorg-NNNNN` project.
    pub fn new(oc: OcClient, engine: ContainerEngine, timing: Timing) -> Self {
        let ops = OpenShiftOperations::new(oc.clone(), "").with_poll_interval(timing.pod_poll);
        Self {
            oc,
            engine,
            ops,
            namespace: String::new(),
            version: String::new(),
            create_prj: true,
            delete_prj: true,
            timing,
            template_dir: PathBuf::from(TEMPLATE_DIR),
        }
    }

    /// Work in an existing namespace; no project is created.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self.ops.set_namespace(self.namespace.clone());
        self.create_prj = false;
        self
    }

    pub fn with_pod_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.ops.set_pod_name_prefix(prefix);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Leave the project in place on `delete_project`.
    pub fn keep_project(mut self) -> Self {
        self.delete_prj = false;
        self
    }

    pub fn with_template_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.template_dir = dir.into();
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn oc(&self) -> &OcClient {
        &self.oc
    }

    pub fn ops(&self) -> &OpenShiftOperations {
        &self.ops
    }

    pub fn ops_mut(&mut self) -> &mut OpenShiftOperations {
        &mut self.ops
    }

    fn ns(&self) -> Option<&str> {
        Some(self.namespace.as_str())
    }

    fn settle(&self) {
        if !self.timing.pod_poll.is_zero() {
            thread::sleep(self.timing.pod_poll);
        }
    }

    fn fetch_template(&self, template: &str) -> Option<PathBuf> {
        download_template(template, &self.template_dir)
            .inspect_err(|e| error!("download_template: {e}"))
            .ok()
    }

    pub fn create_project(&mut self) -> Result<bool> {
        if self.create_prj {
            self.namespace = project_name();
            self.ops.set_namespace(self.namespace.clone());
            self.oc
                .run_oc_command(&format!("new-project {}", self.namespace), None, false)?;
            println!("Project with the name '{}' were created.", self.namespace);
        } else {
            self.oc
                .run_oc_command(&format!("project {}", self.namespace), None, false)?;
        }
        Ok(self.ops.is_project_exists())
    }

    pub fn delete_project(&self) -> Result<()> {
        if !self.delete_prj {
            println!("Deleting project is SUPPRESSED.");
            return Ok(());
        }
        println!("Deleting project {}", self.namespace);
        self.oc.run_oc_command("project default", None, false)?;
        self.oc.run_oc_command(
            &format!("delete project {} --grace-period=0 --force", self.namespace),
            None,
            false,
        )?;
        Ok(())
    }

    pub fn is_pod_running(&mut self, pod_name_prefix: &str) -> bool {
        self.ops.is_pod_running(pod_name_prefix, POD_POLL_CYCLES)
    }

    pub fn is_s2i_pod_running(&mut self, pod_name_prefix: &str) -> bool {
        self.ops.is_s2i_pod_running(pod_name_prefix, POD_POLL_CYCLES)
    }

    pub fn run_command_in_pod(&self, pod_name: &str, command: &str) -> Result<String> {
        let out = self
            .oc
            .run_oc_command(&format!("exec {pod_name} -- \"{command}\""), self.ns(), false)?;
        println!("{out}");
        Ok(out)
    }

    /// `oc create -f <path>` unless imagestream `name` already exists.
    pub fn import_is(&self, path: &Path, name: &str, skip_check: bool) -> Result<()> {
        if !skip_check && self.ops.is_imagestream_exist(name).is_some() {
            info!("imagestream {name} already exists");
            return Ok(());
        }
        self.oc
            .run_oc_command(&format!("create -f {}", path.display()), self.ns(), true)?;
        self.settle();
        Ok(())
    }

    pub fn process_file(&self, path: &Path) -> Result<serde_json::Value> {
        let value: serde_json::Value = self
            .oc
            .get_json(&format!("process -f {}", path.display()), self.ns())?;
        println!("{value}");
        Ok(value)
    }

    /// `oc start-build <service> --from-dir=<app>`.
    pub fn start_build(&self, service_name: &str, app_dir: &Path) -> Result<String> {
        self.oc.run_oc_command(
            &format!("start-build {service_name} --from-dir={}", app_dir.display()),
            self.ns(),
            false,
        )
    }

    /// Log the engine into the cluster's exposed image registry; `None` when no default route exists.
    pub fn docker_login_to_openshift(&self) -> Result<Option<String>> {
        let route: Route = self.oc.get_json(IMAGE_REGISTRY_ROUTE, None)?;
        if route.spec.host.is_empty() {
            println!("Default route does not exist. Install OpenShift 4 cluster properly and expose default route.");
            return Ok(None);
        }
        let token = self.oc.run_oc_command("whoami -t", None, false)?;
        self.engine
            .login("kubeadmin", token.trim(), &route.spec.host, "")?;
        Ok(Some(route.spec.host))
    }

    /// Pull `source_image` and push it into this project as `tagged_image`.
    pub fn upload_image(&self, source_image: &str, tagged_image: &str) -> bool {
        if !self
            .engine
            .pull_image(source_image, 3, Backoff::Linear(self.timing.pull_step))
        {
            return false;
        }
        let registry = match self.docker_login_to_openshift() {
            Ok(Some(r)) => r,
            Ok(None) => return false,
            Err(e) => {
                error!("registry login failed: {e}");
                return false;
            }
        };
        let output_name = format!("{registry}/{}/{tagged_image}", self.namespace);
        println!("Tag image {source_image} as {output_name}");
        if let Err(e) = self
            .engine
            .tag(source_image, &output_name)
            .and_then(|_| self.engine.push(&output_name, ""))
        {
            error!("upload_image failed: {e}");
            return false;
        }
        true
    }

    pub fn create_new_app_with_template(&self, name: &str, template_json: &str, template_args: &[(&str, &str)]) -> Result<String> {
        self.settle();
        let args: Vec<String> = template_args
            .iter()
            .map(|(k, v)| format!("-p {k}={v}"))
            .collect();
        let out = self.oc.run_oc_command(
            format!(
                "new-app {template_json} --name {name} -p NAMESPACE={} {}",
                self.namespace,
                args.join(" ")
            )
            .trim_end(),
            self.ns(),
            false,
        )?;
        println!("{out}");
        Ok(out)
    }

    /// Host of route `routes_name`, when it targets the service of the same name.
    pub fn get_route_url(&self, routes_name: &str) -> Result<Option<String>> {
        let route: Route = self
            .oc
            .get_json(&format!("get routes/{routes_name}"), self.ns())?;
        if route.spec.host.is_empty() || route.spec.to.name != routes_name {
            return Ok(None);
        }
        Ok(Some(route.spec.host))
    }

    /// Build pod finished and the application pod runs.
    pub fn template_deployed(&mut self, name_in_template: &str) -> bool {
        if !self.ops.is_build_pod_finished(POD_POLL_CYCLES) {
            println!("\nBuild pod does not finished in proper time");
            self.ops.print_get_status();
            return false;
        }
        if !self.ops.is_pod_running(name_in_template, POD_POLL_CYCLES) {
            println!("Pod is not running after time.");
            self.ops.print_get_status();
            return false;
        }
        true
    }

    /// Run `cmd` through bash in the command-app pod; output regardless of exit code.
    pub fn command_app_run(&self, cmd: &str) -> String {
        let oc_cmd = format!("exec {COMMAND_APP_NAME} -- bash -c \"{cmd}\"");
        println!("command_app_run: {oc_cmd}");
        self.oc
            .run_oc_command_ignore_error(&oc_cmd, self.ns(), false)
    }

    /// Start the command-app pod and check it can evaluate shell arithmetic.
    pub fn create_deploy_command_app(&mut self, image_name: &str) -> Result<bool> {
        let yaml = serde_yaml::to_string(&CommandAppPod::new(image_name))?;
        let file = unique_path(&std::env::temp_dir(), "command-app-", ".yaml")?;
        fs::write(&file, yaml)?;
        let created = self
            .oc
            .run_oc_command(&format!("create -f {}", file.display()), self.ns(), false);
        let _ = fs::remove_file(&file);
        created?;
        if !self.ops.is_pod_running(COMMAND_APP_NAME, POD_POLL_CYCLES) {
            println!("create_deploy_command_app: command-app pod is not running after time.");
            self.ops.print_get_status();
            return Ok(false);
        }
        Ok(self.command_app_run("echo $((11*11))").contains("121"))
    }

    fn tagged_image(&self, image_name: &str) -> Result<String> {
        get_tagged_image(image_name, &self.version)
            .ok_or_else(|| CiError::message(format!("cannot derive tagged image from '{image_name}'")))
    }

    pub fn imagestream_quickstart(
        &mut self,
        imagestream_file: &str,
        template_file: &str,
        image_name: &str,
        name_in_template: &str,
        args: &[&str],
    ) -> Result<bool> {
        let Some(local_is) = self.fetch_template(imagestream_file) else {
            return Ok(false);
        };
        self.import_is(&local_is, "", true)?;
        let tagged = self.tagged_image(image_name)?;
        if !self.upload_image(image_name, &tagged) {
            return Ok(false);
        }
        self.deploy_template_with_image(image_name, template_file, name_in_template, args)
    }

    /// `oc new-app <tagged image>~<app>` with the source strategy.
    pub fn deploy_s2i_app(&mut self, image_name: &str, app: &str, context: &str, service_name: &str) -> Result<bool> {
        let tagged = self.tagged_image(image_name)?;
        println!("Source image {image_name} was tagged as {tagged}");
        if !self.upload_image(image_name, &tagged) {
            return Ok(false);
        }
        let service_name = if service_name.is_empty() {
            get_service_image(image_name).unwrap_or_default()
        } else {
            service_name.to_string()
        };
        println!("Service name in app is: {service_name}");
        let oc_cmd = format!("new-app {tagged}~{app} --strategy=source --context-dir={context} --name={service_name}");
        match self.oc.run_oc_command(&oc_cmd, self.ns(), false) {
            Ok(out) => println!("{out}"),
            Err(e) if e.is_process_failure() => {
                println!("{}", e.output());
                return Ok(false);
            }
            Err(e) => return Err(e),
        }
        self.settle();
        let app_path = Path::new(app);
        if app_path.is_dir() {
            let out = self.start_build(&service_name, app_path)?;
            println!("Output from start build: {out}");
        }
        Ok(true)
    }

    pub fn deploy_image_stream_template(
        &mut self,
        imagestream_file: &str,
        template_file: &str,
        app_name: &str,
        args: &[&str],
    ) -> Result<bool> {
        let (Some(local_is), Some(local_template)) = (
            self.fetch_template(imagestream_file),
            self.fetch_template(template_file),
        ) else {
            return Ok(false);
        };
        if let Err(e) = self.import_is(&local_is, "", true) {
            println!("deploy_image_stream_template: import_is failed: {e}");
            return Ok(false);
        }
        self.new_app_from(&local_template, app_name, &openshift_args(args))
    }

    /// Import the imagestream file (digits dropped from its name) and deploy `app` with S2I.
    pub fn deploy_imagestream_s2i(&mut self, imagestream_file: &str, image_name: &str, app: &str, context: &str) -> Result<bool> {
        let imagestream_file = DIGITS.replace_all(imagestream_file, "");
        let Some(local_is) = self.fetch_template(&imagestream_file) else {
            return Ok(false);
        };
        self.import_is(&local_is, "", true)?;
        self.deploy_s2i_app(image_name, app, context, "")
    }

    /// Upload `image_name` as `<name_in_template>:<version>` and deploy `template`.
    pub fn deploy_template_with_image(
        &mut self,
        image_name: &str,
        template: &str,
        name_in_template: &str,
        args: &[&str],
    ) -> Result<bool> {
        let tagged = format!("{name_in_template}:{}", self.version);
        if !self.upload_image(image_name, &tagged) {
            return Ok(false);
        }
        self.deploy_template(template, name_in_template, args)
    }

    pub fn deploy_template(&mut self, template: &str, name_in_template: &str, args: &[&str]) -> Result<bool> {
        let Some(local_template) = self.fetch_template(template) else {
            return Ok(false);
        };
        self.new_app_from(&local_template, name_in_template, &openshift_args(args))
    }

    fn new_app_from(&self, template: &Path, name: &str, args: &str) -> Result<bool> {
        println!(
            "========\nCreating a new-app with name {name} in namespace {} with args {args}\n========",
            self.namespace
        );
        let oc_cmd = format!(
            "new-app {} --name={name} -p NAMESPACE={} {args}",
            template.display(),
            self.namespace
        );
        println!("Deploy template by command: oc {oc_cmd}");
        match self.oc.run_oc_command(oc_cmd.trim_end(), self.ns(), false) {
            Ok(out) => println!("{out}"),
            Err(e) if e.is_process_failure() => {
                warn!("new-app failed: {e}");
                return Ok(false);
            }
            Err(e) => return Err(e),
        }
        self.settle();
        Ok(true)
    }

    /// Run `cmd` (with `<IP>` replaced by the service IP) in the command-app until `expected_output` shows.
    pub fn check_command_internal(
        &mut self,
        image_name: &str,
        service_name: &str,
        cmd: &str,
        expected_output: &str,
        timeout: u32,
    ) -> Result<bool> {
        if !self.create_deploy_command_app(image_name)? {
            return Ok(false);
        }
        let ip = self.ops.get_service_ip(service_name)?.unwrap_or_default();
        let cmd = cmd.replace("<IP>", &ip);
        Ok(self.ops.poll(timeout, |_| {
            if self.command_app_run(&cmd).contains(expected_output) {
                return true;
            }
            println!("Output {expected_output} in NOT present in the output of `{cmd}`");
            false
        }))
    }

    /// curl the service from the command-app pod: first the status code, then the body.
    pub fn check_response_inside_cluster(&mut self, cmd_to_run: Option<&str>, check: &ResponseCheck) -> Result<bool> {
        let ip = self
            .ops
            .get_service_ip(&check.name_in_template)?
            .unwrap_or_default();
        let url = format!("{}://{ip}:{}/", check.protocol, check.port);
        println!("URL address to get internal response is: {url}");
        if !self.create_deploy_command_app(DEFAULT_COMMAND_APP_IMAGE)? {
            return Ok(false);
        }
        let code_cmd = cmd_to_run
            .map(str::to_string)
            .unwrap_or_else(|| format!("curl --connect-timeout 10 -k -s -w '%{{http_code}}' {url}"));
        println!("Check if HTTP_CODE is valid.");
        let backoff = Backoff::Fixed(self.timing.http_retry);
        let code_ok = poll_until(check.max_tests, backoff, |_| {
            let out = self.command_app_run(&code_cmd);
            let code = out.get(out.len().saturating_sub(3)..).unwrap_or("");
            match code.parse::<u16>() {
                Ok(c) if c == check.response_code => {
                    println!("HTTP_CODE is VALID {c}");
                    true
                }
                _ => {
                    println!("{code}");
                    false
                }
            }
        });
        if !code_ok {
            warn!("expected HTTP code {} was not returned", check.response_code);
        }
        let body_cmd = format!("curl --connect-timeout 10 -k -s {url}");
        Ok(poll_until(check.max_tests, backoff, |_| {
            let out = self.command_app_run(&body_cmd);
            println!("Check if expected output {} is in {body_cmd}.", check.expected_output);
            if out.contains(&check.expected_output) {
                println!("Expected output '{}' is present.", check.expected_output);
                return true;
            }
            println!(
                "check_response_inside_cluster: expected_output {} not found in output of {body_cmd} command. See {out}",
                check.expected_output
            );
            false
        }))
    }

    /// GET the route of `name_in_template` from outside the cluster, three rounds.
    pub fn check_response_outside_cluster(&self, check: &ResponseCheck) -> Result<bool> {
        let host = self
            .get_route_url(&check.name_in_template)?
            .unwrap_or_default();
        println!("Route name is {host}");
        let url = format!("{}://{host}", check.protocol);
        Ok(poll_until(3, Backoff::Fixed(self.timing.http_retry), |attempt| {
            println!("Let's try to get response from route {url} one more time {attempt}");
            get_response_request(&url, &check.expected_output, check.response_code, 3)
        }))
    }
}
