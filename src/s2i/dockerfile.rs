//! Dockerfile text synthesis for S2I-style builds, plus small Dockerfile rewriting helpers.

use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use crate::errors::{CiError, Result};
use crate::util::fs::unique_path;

pub const LOCAL_APP_DIR: &str = "upload/src/";
pub const LOCAL_SCRIPTS_DIR: &str = "upload/scripts/";
pub const MULTISTAGE_APP_DIR: &str = "app-src";
pub const CA_UPDATE_LINE: &str = "RUN cd /etc/pki/ca-trust/source/anchors && update-ca-trust extract";

static ENV_ARG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(-e|--env)\s*(\S*)=(\S*)").expect("valid env regex"));
static MOUNT_ARG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(-v \.*\S*)").expect("valid mount regex"));

const VALID_INSTRUCTIONS: [&str; 17] = [
    "FROM", "RUN", "CMD", "LABEL", "EXPOSE", "ENV", "ADD", "COPY", "ENTRYPOINT", "VOLUME", "USER",
    "WORKDIR", "ARG", "ONBUILD", "STOPSIGNAL", "HEALTHCHECK", "SHELL",
];

/// First `-v <spec>` of the S2I arguments, or empty.
pub fn mount_options_from_s2i_args(s2i_args: &str) -> String {
    let mount = MOUNT_ARG_RE
        .find(s2i_args)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();
    if !mount.is_empty() {
        info!("Mount options: {mount}");
    }
    mount
}

/// `ENV K=V` for every `-e K=V` / `--env K=V` in the S2I arguments.
pub fn env_commands_from_s2i_args(s2i_args: &str) -> Vec<String> {
    ENV_ARG_RE
        .captures_iter(s2i_args)
        .map(|c| format!("ENV {}={}", &c[2], &c[3]))
        .collect()
}

/// `ENV` lines for a `.s2i/environment` file body; blanks and comments are dropped.
pub fn env_commands_from_environment_file(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| format!("ENV {l}"))
        .collect()
}

/// Inputs of a single-stage S2I Dockerfile.
#[derive(Debug, Clone, Default)]
pub struct S2iDockerfile {
    pub src_image: String,
    /// App location as given by the caller; only used in the LABEL.
    pub app_path: String,
    pub s2i_args: String,
    pub user_id: String,
    /// `.s2i/bin` was present and moved to the scripts directory.
    pub has_scripts: bool,
    pub has_assemble: bool,
    pub has_run: bool,
    /// Body of `.s2i/environment`, when present.
    pub environment_file: Option<String>,
    /// CA file exists on the host.
    pub ca_file_present: bool,
}

impl S2iDockerfile {
    pub fn new(src_image: &str, app_path: &str, s2i_args: &str, user_id: &str) -> Self {
        Self {
            src_image: src_image.to_string(),
            app_path: app_path.to_string(),
            s2i_args: s2i_args.to_string(),
            user_id: user_id.to_string(),
            ..Self::default()
        }
    }

    pub fn incremental(&self) -> bool {
        self.s2i_args.contains("--incremental")
    }

    pub fn lines(&self) -> Vec<String> {
        let uid = &self.user_id;
        let mut lines = vec![
            format!("FROM {}", self.src_image),
            format!(
                "LABEL io.openshift.s2i.build.image={} io.openshift.s2i.build.source-location={}",
                self.src_image, self.app_path
            ),
            "USER root".to_string(),
            format!("COPY {LOCAL_APP_DIR} /tmp/src"),
        ];
        if self.has_scripts {
            lines.push(format!("COPY {} /tmp/scripts", LOCAL_SCRIPTS_DIR.trim_end_matches('/')));
            lines.push(format!("RUN chown -R {uid}:0 /tmp/scripts"));
        }
        lines.push(format!("RUN chown -R {uid}:0 /tmp/src"));
        if let Some(ref env) = self.environment_file {
            lines.extend(env_commands_from_environment_file(env));
        }
        lines.extend(env_commands_from_s2i_args(&self.s2i_args));
        if self.ca_file_present {
            lines.push(CA_UPDATE_LINE.to_string());
        }
        if self.incremental() {
            lines.push("RUN mkdir /tmp/artifacts".to_string());
            lines.push("ADD artifacts.tar /tmp/artifacts".to_string());
            lines.push(format!("RUN chown -R {uid}:0 /tmp/artifacts"));
        }
        lines.push(format!("USER {uid}"));
        lines.push(if self.has_assemble {
            "RUN /tmp/scripts/assemble".to_string()
        } else {
            "RUN /usr/libexec/s2i/assemble".to_string()
        });
        lines.push(if self.has_run {
            "CMD /tmp/scripts/run".to_string()
        } else {
            "CMD /usr/libexec/s2i/run".to_string()
        });
        lines
    }

    pub fn render(&self) -> String {
        self.lines().join("\n")
    }
}

/// Builder stage assembles in `src_image`, the result is copied onto `sec_image`.
pub fn multistage_dockerfile_lines(
    src_image: &str,
    sec_image: &str,
    s2i_args: &str,
    user_id: &str,
    ca_file_present: bool,
) -> Vec<String> {
    let mut lines = vec![
        "# First stage builds the application".to_string(),
        format!("FROM {src_image} as builder"),
        "# Add application sources to a directory that the assemble script expects them".to_string(),
        "# and set permissions so that the container runs without root access".to_string(),
        "USER 0".to_string(),
        format!("ADD {MULTISTAGE_APP_DIR} /tmp/src"),
        "RUN chown -R 1001:0 /tmp/src".to_string(),
    ];
    lines.extend(env_commands_from_s2i_args(s2i_args));
    if ca_file_present {
        lines.push(CA_UPDATE_LINE.to_string());
    }
    lines.extend([
        format!("USER {user_id}"),
        "# Install the dependencies".to_string(),
        "RUN /usr/libexec/s2i/assemble".to_string(),
        "# Second stage copies the application to the minimal image".to_string(),
        format!("FROM {sec_image}"),
        "# Copy the application source and build artifacts from the builder image to this one"
            .to_string(),
        "COPY --from=builder $HOME $HOME".to_string(),
        "# Set the default command for the resulting image".to_string(),
        "CMD /usr/libexec/s2i/run".to_string(),
    ]);
    lines
}

/// Needs a FROM line and only known instructions; blank and comment lines are ignored.
pub fn validate_dockerfile_syntax(content: &str) -> bool {
    let lines: Vec<&str> = content.trim().lines().map(str::trim).collect();
    if !lines.iter().any(|l| l.to_uppercase().starts_with("FROM")) {
        return false;
    }
    lines
        .iter()
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .all(|l| {
            let instruction = l.split_whitespace().next().unwrap_or_default().to_uppercase();
            VALID_INSTRUCTIONS.contains(&instruction.as_str())
        })
}

/// Loads a Dockerfile and rewrites version placeholders in it.
#[derive(Debug, Clone)]
pub struct DockerfileProcessor {
    path: PathBuf,
    content: String,
}

impl DockerfileProcessor {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            return Err(CiError::NotFound(format!("Dockerfile {}", path.display())));
        }
        let content = fs::read_to_string(&path)?;
        Ok(Self { path, content })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    fn rewrite_lines<F: Fn(&str) -> String>(&mut self, f: F) {
        self.content = self
            .content
            .split('\n')
            .map(|line| if line.starts_with('#') { line.to_string() } else { f(line) })
            .collect::<Vec<_>>()
            .join("\n");
    }

    /// Replace every `$<variable>` with `value` outside comment lines.
    pub fn update_variable(&mut self, value: &str, variable: &str) {
        let needle = format!("${variable}");
        self.rewrite_lines(|line| line.replace(&needle, value));
    }

    /// Rewrite lines starting with `prefix` to `<prefix>=<value>` outside comment lines.
    pub fn update_env(&mut self, value: &str, prefix: &str) {
        self.rewrite_lines(|line| {
            if line.starts_with(prefix) {
                format!("{prefix}={value}")
            } else {
                line.to_string()
            }
        });
    }

    /// Write the current content to a fresh temporary file and return its path.
    pub fn create_temp_dockerfile(&self) -> Result<PathBuf> {
        let path = unique_path(&std::env::temp_dir(), "new_dockerfile", "")?;
        fs::write(&path, &self.content)?;
        debug!("processed Dockerfile written to {}", path.display());
        Ok(path)
    }

    pub fn is_valid(&self) -> bool {
        validate_dockerfile_syntax(&self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_options() {
        assert_eq!(mount_options_from_s2i_args("--pull-never"), "");
        assert_eq!(
            mount_options_from_s2i_args("--pull-never -v /some/foo/bar/file:/some/foo/bar/file:Z"),
            "-v /some/foo/bar/file:/some/foo/bar/file:Z"
        );
    }

    #[test]
    fn test_env_commands() {
        assert!(env_commands_from_s2i_args("--pull-never").is_empty());
        assert_eq!(
            env_commands_from_s2i_args("--pull-never -e NODE=development"),
            vec!["ENV NODE=development"]
        );
        assert_eq!(
            env_commands_from_s2i_args("-v mount_point:mount_point:Z -e FOO=bar --env TEST=deployment"),
            vec!["ENV FOO=bar", "ENV TEST=deployment"]
        );
        assert_eq!(
            env_commands_from_s2i_args("-v mount_point:mount_point:Z -e FOO=bar --env TEST"),
            vec!["ENV FOO=bar"]
        );
    }

    #[test]
    fn test_scripts_env_file_and_incremental() {
        let mut df = S2iDockerfile::new("img", "file:///app", "--incremental", "1001");
        df.has_scripts = true;
        df.has_assemble = true;
        df.environment_file = Some("# comment\nA=1\n\nB=2\n".into());
        df.ca_file_present = true;
        let lines = df.lines();
        assert!(lines.contains(&"COPY upload/scripts /tmp/scripts".to_string()));
        assert!(lines.contains(&"ENV A=1".to_string()));
        assert!(lines.contains(&"ENV B=2".to_string()));
        assert!(lines.contains(&CA_UPDATE_LINE.to_string()));
        assert!(lines.contains(&"ADD artifacts.tar /tmp/artifacts".to_string()));
        assert!(lines.contains(&"RUN /tmp/scripts/assemble".to_string()));
        assert_eq!(lines.last().map(String::as_str), Some("CMD /usr/libexec/s2i/run"));
    }

    #[test]
    fn test_multistage_lines() {
        let lines = multistage_dockerfile_lines("builder:1", "runtime:1", "-e A=b", "1001", false);
        assert_eq!(lines[1], "FROM builder:1 as builder");
        assert!(lines.contains(&"ENV A=b".to_string()));
        assert!(lines.contains(&"FROM runtime:1".to_string()));
        assert!(lines.contains(&"COPY --from=builder $HOME $HOME".to_string()));
        assert!(validate_dockerfile_syntax(&lines.join("\n")));
    }

    #[test]
    fn test_validate_syntax() {
        assert!(validate_dockerfile_syntax("FROM fedora\n# c\n\nRUN true\n"));
        assert!(!validate_dockerfile_syntax("RUN true\n"));
        assert!(!validate_dockerfile_syntax("FROM fedora\nBOGUS x\n"));
    }

    #[test]
    fn test_processor_rewrites_outside_comments() {
        let dir = tempfile::tempdir().expect("tmp");
        let path = dir.path().join("Dockerfile");
        fs::write(
            &path,
            "FROM nginx\n# $NGINX_VERSION stays\nLABEL v=$NGINX_VERSION\nNGINX_VERSION=old\n",
        )
        .expect("write");
        let mut p = DockerfileProcessor::new(&path).expect("load");
        p.update_variable("1.24", "NGINX_VERSION");
        assert!(p.content().contains("LABEL v=1.24"));
        assert!(p.content().contains("# $NGINX_VERSION stays"));
        p.update_env("1.26", "NGINX_VERSION");
        assert!(p.content().contains("\nNGINX_VERSION=1.26\n"));
        let tmp = p.create_temp_dockerfile().expect("tmp df");
        assert_eq!(fs::read_to_string(&tmp).expect("read"), p.content());
        let _ = fs::remove_file(tmp);
    }

    #[test]
    fn test_processor_missing_file() {
        assert!(matches!(
            DockerfileProcessor::new("/nonexistent/Dockerfile"),
            Err(CiError::NotFound(_))
        ));
    }
}
