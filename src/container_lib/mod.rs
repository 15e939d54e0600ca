#![allow(clippy::module_name_repetitions)]
//! Container test library: the helper surface image test suites are written against.
//!
//! A `ContainerTestLib` owns two scratch directories: cid-files of containers it started and
//! app-id files of images it built. `cleanup` (or dropping the value after `init`) stops and
//! removes everything recorded there; dropping the value always removes both directories.

pub mod checks;
pub mod cleanup;
pub mod testset;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tracing::{error, info};

use crate::config::Settings;
use crate::engine::images::image_id_from_build_log;
use crate::engine::ContainerEngine;
use crate::errors::{CiError, Result};
use crate::http::{curl_status_command, download_to, is_http_url, split_curl_output};
use crate::poll::{poll_until, wait_for_file, Backoff};
use crate::s2i::build::app_id_file_name;
use crate::s2i::{BuiltImage, S2iBuilder};
use crate::signals::{self, CleanupHandle};
use crate::util::exec::CommandRunner;
use crate::util::fs::{copy_tree, input_extension, read_id_file, unique_path};
use crate::util::{path_prepend, LINE};

pub use checks::{check_envs_set, DEFAULT_ENV_FORMAT, DEFAULT_EXEC_ENV_FILTER};
pub use cleanup::{clean_app_images, clean_containers};
pub use testset::{TestCase, TestOutcome, TestSummary};

pub const EXPECTED_EXIT_CODE: i32 = 0;
pub const CID_WAIT_ATTEMPTS: u32 = 10;
pub const DEFAULT_PULL_LOOPS: u32 = 10;
pub const INPUT_DIR: &str = "/var/tmp";

#[derive(Debug)]
pub struct ContainerTestLib {
    pub(crate) engine: ContainerEngine,
    pub(crate) settings: Settings,
    pub(crate) image_name: String,
    container_args: String,
    cid_file_dir: TempDir,
    app_id_file_dir: TempDir,
    pub(crate) summary: TestSummary,
    expected_exit_code: i32,
    app_image_id: Option<String>,
    cleanup_handle: Option<CleanupHandle>,
    cleaned: bool,
    app_build_dir: Option<PathBuf>,
    app_image_name: String,
}

fn scratch_dir(prefix: &str) -> Result<TempDir> {
    Ok(tempfile::Builder::new().prefix(prefix).tempdir()?)
}

/// Expectations for `ContainerTestLib::test_response`.
#[derive(Debug, Clone)]
pub struct HttpResponseCheck<'a> {
    pub expected_code: u16,
    /// Appended as `:<port>`; `None` uses the URL as given.
    pub port: Option<u16>,
    /// Path appended after the port, e.g. `/index.html`.
    pub page: &'a str,
    /// Regex the body must match; empty accepts any body.
    pub body_regexp: &'a str,
    pub max_attempts: u32,
    /// Connection errors of the first attempts are not logged.
    pub ignore_error_attempts: u32,
    pub debug: bool,
}

impl Default for HttpResponseCheck<'_> {
    fn default() -> Self {
        Self {
            expected_code: 200,
            port: Some(8080),
            page: "",
            body_regexp: "",
            max_attempts: 20,
            ignore_error_attempts: 10,
            debug: false,
        }
    }
}

/// `<url>[:<port>]<page>`.
pub fn response_url(url: &str, port: Option<u16>, page: &str) -> String {
    match port {
        Some(port) => format!("{url}:{port}{page}"),
        None => format!("{url}{page}"),
    }
}

impl ContainerTestLib {
    /// Library for `image_name` using the engine discovered from `settings`.
    pub fn new(image_name: impl Into<String>, settings: Settings) -> Result<Self> {
        let engine = ContainerEngine::from_settings(&settings);
        Self::with_engine(image_name, engine, settings)
    }

    pub fn with_engine(image_name: impl Into<String>, engine: ContainerEngine, settings: Settings) -> Result<Self> {
        Ok(Self {
            engine,
            settings,
            image_name: image_name.into(),
            container_args: String::new(),
            cid_file_dir: scratch_dir("ct_cid_files_")?,
            app_id_file_dir: scratch_dir("ct_app_ids_")?,
            summary: TestSummary::default(),
            expected_exit_code: EXPECTED_EXIT_CODE,
            app_image_id: None,
            cleanup_handle: None,
            cleaned: false,
            app_build_dir: None,
            app_image_name: "app_dockerfile".to_string(),
        })
    }

    /// Reset the summary and arm cleanup on drop and on SIGINT/SIGTERM.
    pub fn init(&mut self) -> Result<()> {
        fs::create_dir_all(self.cid_file_dir.path())?;
        fs::create_dir_all(self.app_id_file_dir.path())?;
        self.summary = TestSummary::default();
        self.enable_cleanup();
        info!("Container test environment initialized");
        info!("APP_ID_FILE_DIR: {}", self.app_id_file_dir.path().display());
        info!("CID_FILE_DIR: {}", self.cid_file_dir.path().display());
        Ok(())
    }

    pub fn enable_cleanup(&mut self) {
        if self.cleanup_handle.is_some() {
            return;
        }
        signals::install();
        self.cleanup_handle = Some(signals::register(
            self.engine.clone(),
            self.cid_file_dir.path().to_path_buf(),
            self.app_id_file_dir.path().to_path_buf(),
            self.expected_exit_code,
        ));
        self.cleaned = false;
    }

    pub fn engine(&self) -> &ContainerEngine {
        &self.engine
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn image_name(&self) -> &str {
        &self.image_name
    }

    pub fn set_image_name(&mut self, image_name: impl Into<String>) {
        self.image_name = image_name.into();
    }

    pub fn set_container_args(&mut self, args: impl Into<String>) {
        self.container_args = args.into();
    }

    pub fn set_expected_exit_code(&mut self, code: i32) {
        self.expected_exit_code = code;
    }

    pub fn cid_file_dir(&self) -> &Path {
        self.cid_file_dir.path()
    }

    pub fn app_id_file_dir(&self) -> &Path {
        self.app_id_file_dir.path()
    }

    /// Image id parsed by the last successful `build_image_and_parse_id`.
    pub fn app_image_id(&self) -> Option<&str> {
        self.app_image_id.as_deref()
    }

    fn runner(&self) -> &Arc<dyn CommandRunner> {
        self.engine.runner()
    }

    pub fn cleanup(&mut self) {
        println!("{LINE}");
        println!("Cleaning of testing containers and images started.");
        println!("It may take a few seconds.");
        println!("{LINE}");
        self.clean_app_images();
        self.clean_containers();
        if let Some(h) = self.cleanup_handle.take() {
            signals::unregister(h);
        }
        self.cleaned = true;
    }

    pub fn clean_app_images(&self) {
        clean_app_images(&self.engine, self.app_id_file_dir.path());
    }

    pub fn clean_containers(&self) {
        clean_containers(&self.engine, self.cid_file_dir.path(), self.expected_exit_code);
    }

    /// Build with `--no-cache`; on success the last output line becomes `app_image_id`.
    pub fn build_image_and_parse_id(&mut self, dockerfile: Option<&str>, build_params: &str) -> bool {
        let log = match self.engine.build_no_cache(dockerfile, build_params, None) {
            Ok(log) => log,
            Err(e) => {
                error!("Build failed: {e}");
                return false;
            }
        };
        println!("{log}");
        match image_id_from_build_log(&log) {
            Ok(id) => {
                self.app_image_id = Some(id);
                true
            }
            Err(e) => {
                error!("{e}");
                false
            }
        }
    }

    /// Write the last built image id into the app-id dir under a name derived from `key`.
    pub(crate) fn record_app_image(&self, key: &str) -> Result<()> {
        if let Some(ref id) = self.app_image_id {
            fs::write(self.app_id_file_dir.path().join(app_id_file_name(key)), id)?;
        }
        Ok(())
    }

    pub fn container_running(&self, cid: &str) -> bool {
        self.engine.container_running(cid)
    }

    pub fn container_exists(&self, cid: &str) -> bool {
        self.engine.container_exists(cid)
    }

    /// Container id stored in cid-file `name`.
    pub fn get_cid(&self, name: &str) -> Result<String> {
        Ok(read_id_file(&self.cid_file_dir.path().join(name))?)
    }

    /// IP address of the container in cid-file `name`; empty when unknown.
    pub fn get_cip(&self, name: &str) -> Result<String> {
        let cid = self.get_cid(name)?;
        Ok(self.engine.container_ip(&cid).unwrap_or_default())
    }

    pub fn wait_for_cid(&self, cid_file: &Path) -> bool {
        wait_for_file(cid_file, CID_WAIT_ATTEMPTS, self.settings.timing.cid_poll)
    }

    /// `run --cidfile=<dir>/<name> -d <container args> <image> <command>`.
    pub fn create_container(&self, name: &str, command: &str) -> Result<bool> {
        let args = self.container_args.clone();
        self.create_container_with(name, command, &args)
    }

    pub fn create_container_with(&self, name: &str, command: &str, container_args: &str) -> Result<bool> {
        fs::create_dir_all(self.cid_file_dir.path())?;
        let cid_file = self.cid_file_dir.path().join(name);
        let cmd = format!(
            "run --cidfile={} -d {container_args} {} {command}",
            cid_file.display(),
            self.image_name
        );
        info!("Command to create container is '{cmd}'.");
        match self.engine.output(&cmd) {
            Ok(_) => {}
            Err(e) if e.is_process_failure() => {
                error!("Failed to create container: {e}");
                return Ok(false);
            }
            Err(e) => return Err(e),
        }
        if !self.wait_for_cid(&cid_file) {
            return Ok(false);
        }
        println!("Created container {}", self.get_cid(name)?);
        Ok(true)
    }

    /// Starting with `container_args` must fail: the container exits non-zero, or never starts.
    pub fn assert_container_creation_fails(&mut self, container_args: &str) -> Result<bool> {
        const NAME: &str = "assert";
        let old_args = std::mem::replace(&mut self.container_args, container_args.to_string());
        let result = self.assert_creation_fails_inner(NAME);
        self.container_args = old_args;
        result
    }

    fn assert_creation_fails_inner(&self, name: &str) -> Result<bool> {
        if !self.create_container(name, "")? {
            return Ok(true);
        }
        let cid = self.get_cid(name)?;
        let stopped = poll_until(
            CID_WAIT_ATTEMPTS,
            Backoff::Fixed(self.settings.timing.cid_poll * 2),
            |_| !self.engine.container_running(&cid),
        );
        if !stopped {
            self.engine.stop(&cid);
            return Ok(false);
        }
        if self.engine.container_exit_code(&cid).ok().as_deref() == Some("0") {
            return Ok(false);
        }
        self.engine.remove_with_volumes(&cid);
        let _ = fs::remove_file(self.cid_file_dir.path().join(name));
        Ok(true)
    }

    /// Pull unless present, sleeping `attempt * 5s` between failures.
    pub fn pull_image(&self, image: &str, loops: u32) -> bool {
        self.engine
            .pull_image(image, loops, Backoff::Linear(self.settings.timing.pull_step))
    }

    pub fn mount_ca_file(&self) -> String {
        self.settings.mount_ca_file()
    }

    pub fn build_s2i_npm_variables(&self) -> String {
        self.settings.npm_variables()
    }

    /// Prepend `dir` to the `PATH`-like variable `var` of this process.
    pub fn path_append(&self, var: &str, dir: &str) {
        let current = std::env::var(var).unwrap_or_default();
        std::env::set_var(var, path_prepend(&current, dir));
    }

    /// `<base>-key.pem` and `<base>-cert-selfsigned.pem` in `output_dir` via openssl.
    pub fn gen_self_signed_cert_pem(&self, output_dir: &Path, base_name: &str) -> bool {
        if let Err(e) = fs::create_dir_all(output_dir) {
            error!("Certificate generation failed: {e}");
            return false;
        }
        let key = output_dir.join(format!("{base_name}-key.pem"));
        let req = output_dir.join(format!("{base_name}-req.pem"));
        let cert = output_dir.join(format!("{base_name}-cert-selfsigned.pem"));
        let steps = [
            format!(
                "openssl req -newkey rsa:2048 -nodes -keyout {} -subj '/C=GB/ST=Berkshire/L=Newbury/O=My Server Company' > {}",
                key.display(),
                req.display()
            ),
            format!(
                "openssl req -new -x509 -nodes -key {} -batch > {}",
                key.display(),
                cert.display()
            ),
        ];
        for step in &steps {
            if let Err(e) = self.runner().check(step) {
                error!("Certificate generation failed: {e}");
                return false;
            }
        }
        true
    }

    /// Copy a local file or directory, or download a URL, into `/var/tmp/test-input-*`.
    pub fn obtain_input(&self, input: &str) -> Result<PathBuf> {
        self.obtain_input_in(input, Path::new(INPUT_DIR))
    }

    pub fn obtain_input_in(&self, input: &str, dir: &Path) -> Result<PathBuf> {
        let ext = input_extension(input);
        let source = Path::new(input);
        if source.is_file() {
            let target = unique_path(dir, "test-input-", &ext)?;
            fs::copy(source, &target)?;
            Ok(target)
        } else if source.is_dir() {
            let target = tempfile::Builder::new()
                .prefix("test-input-")
                .suffix(&ext)
                .tempdir_in(dir)?
                .keep();
            copy_tree(source, &target)?;
            Ok(target)
        } else if is_http_url(input) {
            let target = unique_path(dir, "test-input-", &ext)?;
            download_to(input, &target).inspect_err(|e| error!("Failed to download {input}: {e}"))?;
            Ok(target)
        } else {
            error!("File type not known: {input}");
            Err(CiError::NotFound(format!("input {input}")))
        }
    }

    /// curl `<url>:<port><page>` until it answers `expected_code` with a body matching `body_regexp`.
    ///
    /// `https://` URLs are fetched with `--insecure`.
    pub fn test_response(&self, url: &str, check: &HttpResponseCheck<'_>) -> Result<bool> {
        let full_url = response_url(url, check.port, check.page);
        println!("Testing the HTTP(S) response for <{full_url}>");
        let body_re = if check.body_regexp.is_empty() {
            None
        } else {
            Some(regex::Regex::new(check.body_regexp)?)
        };
        let cmd = curl_status_command(&full_url, url.starts_with("https://"));
        Ok(poll_until(
            check.max_attempts,
            Backoff::Fixed(self.settings.timing.http_retry),
            |attempt| {
                println!("Trying to connect ... {attempt}");
                let out = match self.runner().output(&cmd) {
                    Ok(o) => o,
                    Err(e) => {
                        if attempt > check.ignore_error_attempts {
                            error!("{e}");
                        }
                        return false;
                    }
                };
                if check.debug {
                    println!("{out}");
                }
                match split_curl_output(&out) {
                    Some((body, code)) if code == check.expected_code => {
                        body_re.as_ref().map_or(true, |re| re.is_match(body))
                    }
                    Some((_, code)) => {
                        info!("Response code {code}, expected {}", check.expected_code);
                        false
                    }
                    None => false,
                }
            },
        ))
    }

    pub fn assert_cmd_success(&self, cmd: &[&str]) -> bool {
        let line = cmd.join(" ");
        print!("Checking '{line}' for success ...");
        let ok = self.runner().check(&line).is_ok();
        println!("{}", if ok { " PASS" } else { " FAIL" });
        ok
    }

    pub fn assert_cmd_failure(&self, cmd: &[&str]) -> bool {
        let line = cmd.join(" ");
        print!("Checking '{line}' for failure ...");
        let failed = self.runner().check(&line).is_err();
        println!("{}", if failed { " PASS" } else { " FAIL" });
        failed
    }

    /// Output of the image's S2I usage script; empty on failure.
    pub fn s2i_usage(&self) -> String {
        self.engine
            .run_container(&format!("--rm {} bash -c /usr/libexec/s2i/usage", self.image_name))
            .unwrap_or_else(|e| {
                error!("S2I usage failed: {e}");
                String::new()
            })
    }

    pub fn show_resources(&self) {
        println!();
        println!("{LINE}");
        println!("Resources info:");
        for (title, cmd, missing) in [
            ("Memory:", "free -h", "Memory info not available"),
            ("Storage:", "df -h", "Storage info not available"),
            ("CPU", "lscpu", "CPU info not available"),
        ] {
            println!("{title}");
            if self.runner().check(cmd).is_err() {
                println!("{missing}");
            }
        }
        if !self.image_name.is_empty() {
            println!("{LINE}");
            println!("Image {} information:", self.image_name);
            println!("{LINE}");
            println!(
                "Uncompressed size of the image: {}",
                self.get_image_size_uncompressed(&self.image_name)
            );
            println!(
                "Compressed size of the image: {}",
                self.get_image_size_compressed(&self.image_name)
            );
            println!();
        }
    }

    pub fn get_image_size_uncompressed(&self, image: &str) -> String {
        self.engine.image_size_uncompressed(image)
    }

    pub fn get_image_size_compressed(&self, image: &str) -> String {
        self.engine.image_size_compressed(image)
    }

    fn s2i_builder(&self) -> S2iBuilder<'_> {
        S2iBuilder::new(&self.engine, &self.settings).record_ids_in(self.app_id_file_dir.path())
    }

    /// S2I build of `app_path`; the returned library targets `dst_image`.
    pub fn build_as_df(&mut self, app_path: &str, src_image: &str, dst_image: &str, s2i_args: &str) -> Result<ContainerTestLib> {
        self.build_as_df_build_args(app_path, src_image, dst_image, "", s2i_args)
    }

    pub fn build_as_df_build_args(
        &mut self,
        app_path: &str,
        src_image: &str,
        dst_image: &str,
        build_args: &str,
        s2i_args: &str,
    ) -> Result<ContainerTestLib> {
        let built = self
            .s2i_builder()
            .build_as_df_build_args(app_path, src_image, dst_image, build_args, s2i_args)?;
        self.app_image_id = Some(built.image_id.clone());
        ContainerTestLib::with_engine(built.image, self.engine.clone(), self.settings.clone())
    }

    pub fn multistage_build(
        &mut self,
        app_path: &str,
        src_image: &str,
        sec_image: &str,
        dst_image: &str,
        s2i_args: &str,
    ) -> Result<BuiltImage> {
        let built = self
            .s2i_builder()
            .multistage_build(app_path, src_image, sec_image, dst_image, s2i_args)?;
        self.app_image_id = Some(built.image_id.clone());
        Ok(built)
    }

    /// Build `dockerfile` (FROM rewritten to this image) with the app copied or cloned into `app_dir`.
    pub fn build_test_container(
        &mut self,
        dockerfile: &Path,
        app_url: &str,
        app_dir: &str,
        build_args: &str,
    ) -> Result<bool> {
        if app_dir.is_empty() {
            println!("test_app_dockerfile: Parameter app_dir has to be set.");
            return Ok(false);
        }
        if !dockerfile.exists() {
            println!(
                "test_app_dockerfile: Dockerfile {} does not exist or is empty.",
                dockerfile.display()
            );
            return Ok(false);
        }
        let build_dir = tempfile::Builder::new()
            .suffix("app_test_dir")
            .tempdir()?
            .keep();
        let content = fs::read_to_string(dockerfile)?;
        let rewritten = rewrite_from_line(&content, &self.image_name);
        fs::write(build_dir.join("Dockerfile"), rewritten)?;

        let app_target = build_dir.join(app_dir);
        if Path::new(app_url).is_dir() {
            println!("Copy local folder {app_url} to {app_dir}.");
            copy_tree(Path::new(app_url), &app_target)?;
        } else {
            self.runner()
                .check(&format!("git clone {app_url} {}", app_target.display()))?;
        }
        println!("Building '{}' image using docker build", self.app_image_name);
        let df = build_dir.join("Dockerfile").display().to_string();
        let params = format!("-t {} {} {build_args}", self.app_image_name, build_dir.display());
        self.app_build_dir = Some(build_dir);
        if !self.build_image_and_parse_id(Some(&df), params.trim_end()) {
            return Ok(false);
        }
        self.record_app_image(&self.app_image_name)?;
        Ok(true)
    }

    /// Start the image built by `build_test_container` and wait for its cid-file.
    pub fn test_run_app_dockerfile(&self) -> Result<bool> {
        if self.app_build_dir.is_none() {
            return Err(CiError::message("build_test_container has not been run"));
        }
        let cid_file = self.cid_file_dir.path().join(&self.app_image_name);
        let cmd = format!(
            "run -d --cidfile={} --rm {}",
            cid_file.display(),
            self.app_image_name
        );
        println!("Run container {}: {cmd}", self.app_image_name);
        let out = self.engine.output_ignore_error(&cmd);
        println!("Output from run is:\n{}", out.trim());
        if !self.wait_for_cid(&cid_file) {
            println!("Container did not create cidfile. See logs from container.");
            return Ok(false);
        }
        Ok(true)
    }

    /// IP of the container started by `test_run_app_dockerfile`.
    pub fn get_app_cip(&self) -> Result<Option<String>> {
        if self.app_build_dir.is_none() {
            return Ok(None);
        }
        let cid = self.get_cid(&self.app_image_name)?;
        self.engine.inspect_ip_address(&cid)
    }

    /// Logs of the container recorded in cid-file `name`.
    pub fn get_logs(&self, name: &str) -> Result<String> {
        let cid = self.get_cid(name)?;
        self.engine.logs(&cid)
    }

    /// Cleanup run at drop time: resources, cleanup, results.
    fn trap_on_exit(&mut self) {
        println!("Tests finished with EXIT={}", self.summary.suite_result);
        if !self.settings.debug {
            self.show_resources();
        }
        self.cleanup();
        self.show_results();
    }
}

impl Drop for ContainerTestLib {
    fn drop(&mut self) {
        if self.cleanup_handle.is_some() && !self.cleaned {
            self.trap_on_exit();
        }
        if let Some(dir) = self.app_build_dir.take() {
            let _ = fs::remove_dir_all(dir);
        }
    }
}

/// Replace every `FROM ...` line with `FROM  <image>`.
pub fn rewrite_from_line(dockerfile: &str, image: &str) -> String {
    dockerfile
        .split('\n')
        .map(|line| {
            if line.starts_with("FROM") {
                format!("FROM  {image}")
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_from_line() {
        let df = "FROM quay.io/old:1\nRUN true\nFROM other";
        assert_eq!(rewrite_from_line(df, "new:2"), "FROM  new:2\nRUN true\nFROM  new:2");
    }
}
