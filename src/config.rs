//! Environment-derived settings.
//!
//! Rules
//! - A `.env` file in the working directory is loaded first (missing file is fine).
//! - Empty or whitespace-only variables count as unset.
//! - Poll intervals live in `Timing` so tests can run without sleeping.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CA_FILE_PATH: &str = "/etc/pki/ca-trust/source/anchors/RH-IT-Root-CA.crt";

/// Trimmed env getter returning Some when non-empty.
pub fn env_trim(k: &str) -> Option<String> {
    env::var(k)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_flag(k: &str) -> bool {
    env_trim(k).is_some()
}

/// Sleep intervals between retries.
#[derive(Debug, Clone)]
pub struct Timing {
    /// Linear step for image pulls (`attempt * pull_step`).
    pub pull_step: Duration,
    pub cid_poll: Duration,
    pub http_retry: Duration,
    pub pod_poll: Duration,
    pub db_retry: Duration,
    pub helm_retry: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            pull_step: Duration::from_secs(5),
            cid_poll: Duration::from_secs(1),
            http_retry: Duration::from_secs(3),
            pod_poll: Duration::from_secs(3),
            db_retry: Duration::from_secs(3),
            helm_retry: Duration::from_secs(3),
        }
    }
}

impl Timing {
    /// All intervals zero.
    pub fn immediate() -> Self {
        Self {
            pull_step: Duration::ZERO,
            cid_poll: Duration::ZERO,
            http_retry: Duration::ZERO,
            pod_poll: Duration::ZERO,
            db_retry: Duration::ZERO,
            helm_retry: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// Explicit engine from `CONTAINER_ENGINE`; discovery happens in `engine::runtime`.
    pub container_engine: Option<String>,
    pub skip_engine: bool,
    pub npm_registry: Option<String>,
    pub ca_file_path: PathBuf,
    pub debug: bool,
    pub unstable_tests: Vec<String>,
    pub ignore_unstable_tests: bool,
    pub image_name: Option<String>,
    pub version: Option<String>,
    pub os: Option<String>,
    pub timing: Timing,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            container_engine: None,
            skip_engine: false,
            npm_registry: None,
            ca_file_path: PathBuf::from(DEFAULT_CA_FILE_PATH),
            debug: false,
            unstable_tests: Vec::new(),
            ignore_unstable_tests: false,
            image_name: None,
            version: None,
            os: None,
            timing: Timing::default(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self {
            container_engine: env_trim("CONTAINER_ENGINE"),
            skip_engine: env_trim("CT_SKIP_ENGINE").as_deref() == Some("1"),
            npm_registry: env_trim("NPM_REGISTRY"),
            ca_file_path: env_trim("CA_FILE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CA_FILE_PATH)),
            debug: env_flag("DEBUG"),
            unstable_tests: env_trim("UNSTABLE_TESTS")
                .map(|v| v.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            ignore_unstable_tests: env_flag("IGNORE_UNSTABLE_TESTS"),
            image_name: env_trim("IMAGE_NAME"),
            version: env_trim("VERSION"),
            os: env_trim("OS"),
            timing: Timing::default(),
        }
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn ca_file(&self) -> &Path {
        &self.ca_file_path
    }

    /// NPM registry, only when the CA file it depends on is present on the host.
    pub fn npm_registry_with_ca(&self) -> Option<&str> {
        self.npm_registry
            .as_deref()
            .filter(|_| self.ca_file_path.exists())
    }

    /// `-v <ca>:<ca>:Z` when an NPM registry is configured and the CA file exists.
    pub fn mount_ca_file(&self) -> String {
        match self.npm_registry_with_ca() {
            Some(_) => {
                let ca = self.ca_file_path.display();
                format!("-v {ca}:{ca}:Z")
            }
            None => String::new(),
        }
    }

    /// `-e NPM_MIRROR=<registry> <ca mount>` or empty.
    pub fn npm_variables(&self) -> String {
        match self.npm_registry_with_ca() {
            Some(registry) => format!("-e NPM_MIRROR={} {}", registry, self.mount_ca_file()),
            None => String::new(),
        }
    }

    pub fn is_unstable(&self, test_case: &str) -> bool {
        self.unstable_tests.iter().any(|t| t == test_case)
    }

    /// True when IMAGE_NAME, VERSION and OS are all set.
    pub fn check_variables(&self) -> bool {
        let mut ok = true;
        for (name, value) in [
            ("IMAGE_NAME", &self.image_name),
            ("VERSION", &self.version),
            ("OS", &self.os),
        ] {
            if value.is_none() {
                tracing::error!("{name} variable is not set");
                ok = false;
            }
        }
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_variables_requires_all_three() {
        let mut s = Settings {
            image_name: Some("rhel8/nodejs-16".into()),
            version: Some("16".into()),
            ..Settings::default()
        };
        assert!(!s.check_variables());
        s.os = Some("rhel8".into());
        assert!(s.check_variables());
    }

    #[test]
    fn test_npm_variables_require_ca_file() {
        let dir = tempfile::tempdir().expect("tmp");
        let ca = dir.path().join("ca.crt");
        let mut s = Settings {
            npm_registry: Some("https://npm.example.com".into()),
            ca_file_path: ca.clone(),
            ..Settings::default()
        };
        assert_eq!(s.npm_variables(), "");
        std::fs::write(&ca, "cert").expect("write ca");
        let expected_mount = format!("-v {0}:{0}:Z", ca.display());
        assert_eq!(s.mount_ca_file(), expected_mount);
        assert_eq!(
            s.npm_variables(),
            format!("-e NPM_MIRROR=https://npm.example.com {expected_mount}")
        );
        s.npm_registry = None;
        assert_eq!(s.mount_ca_file(), "");
    }

    #[test]
    fn test_unstable_lookup() {
        let s = Settings {
            unstable_tests: vec!["test_npm".into()],
            ..Settings::default()
        };
        assert!(s.is_unstable("test_npm"));
        assert!(!s.is_unstable("test_run"));
    }
}
