//! HTTP probing, either in-process via reqwest or through a `curl` subprocess.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::Client;
use tracing::{debug, info, warn};

use crate::errors::{CiError, Result};
use crate::util::fs::{input_extension, unique_path};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Blocking client with certificate verification off; probed services use self-signed certs.
pub fn insecure_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder()
        .timeout(timeout)
        .danger_accept_invalid_certs(true)
        .build()?)
}

/// GET `url` up to `max_tests` times until a response arrives.
///
/// The first non-error response decides: its status must equal `response_code` and its
/// body must contain `expected`. Error statuses and timeouts are retried.
pub fn get_response_request(url: &str, expected: &str, response_code: u16, max_tests: u32) -> bool {
    let client = match insecure_client(REQUEST_TIMEOUT) {
        Ok(c) => c,
        Err(e) => {
            warn!("cannot build HTTP client: {e}");
            return false;
        }
    };
    for attempt in 1..=max_tests {
        let resp = match client.get(url).send().and_then(|r| r.error_for_status()) {
            Ok(r) => r,
            Err(e) => {
                info!("get_response_request: service is not yet available ({e}), attempt {attempt}");
                continue;
            }
        };
        let status = resp.status().as_u16();
        println!("Response code is {status} and expected should be {response_code}");
        let body = resp.text().unwrap_or_default();
        return status == response_code && body.contains(expected);
    }
    false
}

/// `curl` invocation printing the body followed by the 3-digit status code.
pub fn curl_status_command(url: &str, insecure: bool) -> String {
    let k = if insecure { "--insecure " } else { "" };
    format!("curl --connect-timeout 10 {k}-s -w '%{{http_code}}' '{url}'")
}

/// Split `<body><3-digit code>` curl output.
pub fn split_curl_output(output: &str) -> Option<(&str, u16)> {
    if output.len() < 3 || !output.is_char_boundary(output.len() - 3) {
        return None;
    }
    let (body, code) = output.split_at(output.len() - 3);
    code.parse().ok().map(|c| (body, c))
}

/// True for absolute `http`/`https` URLs.
pub fn is_http_url(input: &str) -> bool {
    url::Url::parse(input).is_ok_and(|u| matches!(u.scheme(), "http" | "https"))
}

/// Download `url` into `dest`.
pub fn download_to(url: &str, dest: &Path) -> Result<()> {
    debug!("downloading {url} to {}", dest.display());
    let client = insecure_client(Duration::from_secs(120))?;
    let bytes = client.get(url).send()?.error_for_status()?.bytes()?;
    fs::write(dest, &bytes)?;
    Ok(())
}

/// Copy a local template, or download an `http(s)` one, to a fresh `test-input*` file in `dir`.
pub fn download_template(template: &str, dir: &Path) -> Result<PathBuf> {
    let ext = input_extension(template);
    let target = unique_path(dir, "test-input", &ext)?;
    debug!("download_template: {} -> {}", template, target.display());
    if Path::new(template).exists() {
        fs::copy(template, &target)?;
    } else if is_http_url(template) {
        download_to(template, &target)?;
    } else {
        let _ = fs::remove_file(&target);
        return Err(CiError::NotFound(format!("template {template}")));
    }
    Ok(target)
}
