#![allow(clippy::module_name_repetitions)]
//! Image helpers: presence, pull with retries, user resolution, sizes, build.

use std::path::Path;

use tracing::{info, warn};

use super::{ContainerEngine, BUILD_TIMEOUT};
use crate::errors::{CiError, Result};
use crate::poll::{poll_until, Backoff};
use crate::util::exec::ExecRequest;
use crate::util::join_nonempty;

const MIB: u64 = 1024 * 1024;

impl ContainerEngine {
    /// True when `inspect -f '{{.Id}}' <id>` succeeds; output is captured.
    pub fn image_id_known(&self, id: &str) -> bool {
        self.inspect("{{.Id}}", id).is_ok()
    }

    /// True when `images -q <image>` lists anything (never pulls).
    pub fn image_exists(&self, image: &str) -> bool {
        !self
            .output_ignore_error(&format!("images -q {image}"))
            .trim()
            .is_empty()
    }

    /// Pull unless present locally, retrying with `backoff` between attempts.
    pub fn pull_image(&self, image: &str, loops: u32, backoff: Backoff) -> bool {
        println!("-> Pulling image {image} ...");
        if self.image_exists(image) {
            println!("The image {image} is already pulled.");
            return true;
        }
        let pulled = poll_until(loops, backoff, |attempt| {
            if self.check(&format!("pull {image}")).is_ok() {
                return true;
            }
            warn!(
                "Pulling image {image} failed. Let's wait {:?} and try again.",
                backoff.delay(attempt)
            );
            false
        });
        if !pulled {
            println!("Pulling of image {image} failed {loops} times in a row. Giving up.");
            println!("!!! ERROR with pulling image {image} !!!!");
        }
        pulled
    }

    /// `Config.User` of an image; empty means root.
    pub fn image_user(&self, image: &str) -> Result<String> {
        let user = self.inspect("{{.Config.User}}", image)?;
        Ok(if user.is_empty() { "0".to_string() } else { user })
    }

    /// Numeric uid for `user` inside `image`; numeric users are returned as-is.
    pub fn uid_from_image(&self, user: &str, image: &str) -> Option<String> {
        if !user.is_empty() && user.chars().all(|c| c.is_ascii_digit()) {
            return Some(user.to_string());
        }
        let out = self
            .output(&format!("run --rm {image} bash -c 'id -u {user}' 2>/dev/null"))
            .ok()?;
        let uid = out.trim().to_string();
        if uid.is_empty() || !uid.chars().all(|c| c.is_ascii_digit()) {
            warn!("user {user} not found in image {image}");
            return None;
        }
        Some(uid)
    }

    pub fn image_size_uncompressed(&self, image: &str) -> String {
        match self
            .inspect("{{.Size}}", image)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            Some(bytes) => format!("{}MB", bytes / MIB),
            None => "Unknown".to_string(),
        }
    }

    pub fn image_size_compressed(&self, image: &str) -> String {
        match self
            .output(&format!("save {image} | gzip - | wc --bytes"))
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
        {
            Some(bytes) => format!("{}MB", bytes / MIB),
            None => "Unknown".to_string(),
        }
    }

    /// `build --no-cache [-f df] <params>` with quotes stripped and a 10 minute limit.
    ///
    /// Returns the build log; the image id is its last non-empty line.
    pub fn build_no_cache(
        &self,
        dockerfile: Option<&str>,
        params: &str,
        context_dir: Option<&Path>,
    ) -> Result<String> {
        let df = dockerfile.map(|d| format!("-f {d} ")).unwrap_or_default();
        let cmd = format!("build --no-cache {df}{params}").replace('\'', "");
        let mut request = ExecRequest::new(self.command_line(&cmd)).timeout(BUILD_TIMEOUT);
        if let Some(dir) = context_dir {
            request = request.cwd(dir);
        }
        let out = self.run_request(request)?;
        Ok(out.output)
    }

    /// `build <args>` with the build timeout, streaming output.
    pub fn build(&self, args: &str) -> Result<()> {
        self.run_request(
            ExecRequest::new(self.command_line(&format!("build {args}")))
                .return_output(false)
                .timeout(BUILD_TIMEOUT),
        )
        .map(|_| ())
    }

    pub fn rmi_force(&self, image: &str) {
        self.output_ignore_error(&format!("rmi -f {image}"));
    }

    pub fn tag(&self, source: &str, target: &str) -> Result<()> {
        self.check(&format!("tag {source} {target}"))
    }

    pub fn push(&self, image: &str, extra: &str) -> Result<()> {
        self.check(&join_nonempty(&["push", extra, image]))
    }

    pub fn login(&self, user: &str, token: &str, registry: &str, extra: &str) -> Result<()> {
        info!("logging into registry {registry}");
        let creds = format!("-u {user} -p {token}");
        self.check(&join_nonempty(&["login", extra, &creds, registry]))
    }
}

/// Last non-empty line of a build log.
pub fn image_id_from_build_log(log: &str) -> Result<String> {
    log.lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
        .ok_or_else(|| CiError::message("build produced no output to parse an image id from"))
}
