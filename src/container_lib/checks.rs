//! Image behaviour checks: environment propagation, SCL enablement, docs, npm, binaries.

use std::fs;

use regex::{Regex, RegexBuilder};
use tracing::{error, info};

use super::ContainerTestLib;
use crate::errors::Result;
use crate::util::fs::read_id_file;

pub const DEFAULT_EXEC_ENV_FILTER: &str = "^X_SCLS=|/opt/rh|/opt/app-root";
pub const DEFAULT_ENV_FORMAT: &str = "*VALUE*";

/// Regex for one value under `env_format`: `*` is a wildcard, `VALUE` the escaped value.
fn value_pattern(env_format: &str, value: &str) -> String {
    let escaped = regex::escape(value);
    env_format
        .split('*')
        .map(|part| part.replace("VALUE", &escaped))
        .collect::<Vec<_>>()
        .join(".*")
}

/// Every `loop_envs` variable matching `env_filter` must exist in `check_envs`, and each of its
/// `:`-separated values matching the filter must appear in the checked value per `env_format`.
pub fn check_envs_set(env_filter: &str, check_envs: &str, loop_envs: &str, env_format: &str) -> Result<bool> {
    let filter = Regex::new(env_filter)?;
    for line in loop_envs.lines().map(str::trim) {
        if line.is_empty() || line.starts_with("PWD=") || !filter.is_match(line) {
            continue;
        }
        let Some((name, values)) = line.split_once('=') else {
            continue;
        };
        let prefix = format!("{name}=");
        let Some(checked) = check_envs.lines().find(|l| l.starts_with(&prefix)) else {
            println!("{name} not found during 'docker exec'");
            return Ok(false);
        };
        for value in values.split(':').filter(|v| filter.is_match(v)) {
            let re = Regex::new(&value_pattern(env_format, value))?;
            if !re.is_match(checked) {
                println!("Value {value} is missing from variable {name}");
                println!("{checked}");
                return Ok(false);
            }
        }
    }
    Ok(true)
}

impl ContainerTestLib {
    pub fn check_envs_set(&self, env_filter: &str, check_envs: &str, loop_envs: &str, env_format: &str) -> Result<bool> {
        check_envs_set(env_filter, check_envs, loop_envs, env_format)
    }

    /// Variables seen by `run` must survive into `exec` of a long-running container.
    pub fn check_exec_env_vars(&mut self, env_filter: &str) -> Result<bool> {
        let image = self.image_name.clone();
        let run_envs = self.engine.run_container(&format!("--rm {image} /bin/bash -c env"))?;
        if !self.create_container("test_exec_envs", "bash -c 'sleep 1000'")? {
            return Ok(false);
        }
        let cid = self.get_cid("test_exec_envs")?;
        let exec_envs = self.engine.exec(&cid, "env")?;
        let ok = check_envs_set(env_filter, &exec_envs, &run_envs, DEFAULT_ENV_FORMAT)?;
        if ok {
            println!("All values present in 'docker exec'");
        }
        Ok(ok)
    }

    /// After `scl enable` every enabled collection path must appear twice.
    pub fn check_scl_enable_vars(&self, env_filter: &str) -> Result<bool> {
        let image = &self.image_name;
        let enabled = self
            .engine
            .run_container(&format!("--rm {image} /bin/bash -c 'echo $X_SCLS'"))?
            .trim()
            .to_string();
        let filter = if env_filter.is_empty() {
            enabled
                .split_whitespace()
                .map(|scl| format!("/{scl}"))
                .collect::<Vec<_>>()
                .join("|")
        } else {
            env_filter.to_string()
        };
        let loop_envs = self.engine.run_container(&format!("--rm {image} /bin/bash -c env"))?;
        let run_envs = self.engine.run_container(&format!(
            "--rm {image} /bin/bash -c 'X_SCLS= scl enable {enabled} env'"
        ))?;
        let ok = check_envs_set(&filter, &run_envs, &loop_envs, "*VALUE*VALUE*")?;
        if ok {
            println!("All scl_enable values present");
        }
        Ok(ok)
    }

    /// `command` output must contain `expected` via `run`, `exec bash -c` and `exec sh -ic`.
    pub fn scl_usage_old(&self, name: &str, command: &str, expected: &str) -> Result<bool> {
        println!("Testing the image SCL enable");
        let cid = self.get_cid(name)?;
        let probes = [
            (
                format!("run --rm {} /bin/bash -c '{command}'", self.image_name),
                format!("/bin/bash -c '{command}'"),
            ),
            (
                format!("exec {cid} /bin/bash -c '{command}'"),
                format!("exec /bin/bash -c '{command}'"),
            ),
            (
                format!("exec {cid} /bin/sh -ic '{command}'"),
                format!("exec /bin/sh -ic '{command}'"),
            ),
        ];
        for (cmd, label) in probes {
            let out = match self.engine.output(&cmd) {
                Ok(o) => o,
                Err(_) => return Ok(false),
            };
            if !out.contains(expected) {
                println!("ERROR[{label}] Expected '{expected}', got '{out}'");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// `/help.1` must contain each term and look like troff.
    pub fn doc_content_old(&self, strings: &[&str]) -> Result<bool> {
        println!("Testing documentation in the container image");
        let content = match self
            .engine
            .run_container(&format!("--rm {} /bin/bash -c 'cat /help.1'", self.image_name))
        {
            Ok(c) => c,
            Err(_) => {
                println!("ERROR: Could not extract help.1 from container");
                return Ok(false);
            }
        };
        for term in strings {
            if !content.contains(term) {
                println!("ERROR: File /help.1 does not include '{term}'.");
                return Ok(false);
            }
        }
        for macro_name in ["TH", "PP", "SH"] {
            let re = RegexBuilder::new(&format!(r"^\.{macro_name}"))
                .multi_line(true)
                .build()?;
            if !re.is_match(&content) {
                println!(
                    "ERROR: /help.1 is probably not in troff or groff format, since '{macro_name}' is missing."
                );
                return Ok(false);
            }
        }
        println!("Success!");
        Ok(true)
    }

    /// npm runs and can install jquery inside `<image>-testapp`.
    pub fn npm_works(&self) -> Result<bool> {
        let image = &self.image_name;
        let tmp = tempfile::tempdir()?;
        let cid_file = tmp.path().join("npm_test_cid");
        println!("Testing npm in the container image");

        if self
            .engine
            .run_container(&format!("--rm {image} /bin/bash -c 'npm --version'"))
            .is_err()
        {
            println!("ERROR: 'npm --version' does not work inside the image {image}.");
            return Ok(false);
        }

        let test_app = format!("{image}-testapp");
        let run = format!(
            "run -d {} --rm --cidfile={} {test_app}",
            self.settings.mount_ca_file(),
            cid_file.display()
        );
        if self.engine.check(&run).is_err() {
            println!("ERROR: Could not start {test_app}");
            return Ok(false);
        }
        if !self.wait_for_cid(&cid_file) {
            return Ok(false);
        }
        let cid = read_id_file(&cid_file)?;

        let jquery = match self.engine.exec(
            &cid,
            "/bin/bash -c 'npm --verbose install jquery && test -f node_modules/jquery/src/jquery.js'",
        ) {
            Ok(o) => o,
            Err(_) => {
                println!("ERROR: npm could not install jquery inside the image {image}.");
                return Ok(false);
            }
        };
        if let Some(registry) = self.settings.npm_registry_with_ca() {
            if !jquery.contains(registry) {
                println!("ERROR: Internal repository is NOT set. Even it is requested.");
                return Ok(false);
            }
        }
        self.engine.stop(&cid);
        println!("Success!");
        Ok(true)
    }

    /// A Dockerfile build on top of the image must find `binary` under `binary_path`.
    pub fn binary_found_from_df(&mut self, binary: &str, binary_path: &str) -> Result<bool> {
        let tmp = tempfile::tempdir()?;
        info!("Testing {binary} in build from Dockerfile");
        let dockerfile = tmp.path().join("Dockerfile");
        fs::write(
            &dockerfile,
            binary_check_dockerfile(&self.image_name, binary, binary_path),
        )?;
        let df = dockerfile.display().to_string();
        let ctx = tmp.path().display().to_string();
        if self.build_image_and_parse_id(Some(&df), &ctx) {
            self.record_app_image(binary)?;
            Ok(true)
        } else {
            error!("Failed to find {binary} in $PATH!");
            Ok(false)
        }
    }
}

/// Dockerfile checking that `binary` resolves to a path matching `binary_path`.
pub fn binary_check_dockerfile(image: &str, binary: &str, binary_path: &str) -> String {
    format!("FROM {image}\nRUN command -v {binary} | grep '{binary_path}'\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_pattern() {
        assert_eq!(value_pattern("*VALUE*", "/usr/bin"), ".*/usr/bin.*");
        assert_eq!(value_pattern("*VALUE*VALUE*", "a.b"), r".*a\.b.*a\.b.*");
    }

    #[test]
    fn test_env_matcher_accepts_subset() {
        assert!(check_envs_set("PATH", "PATH=/usr/bin:/bin", "PATH=/usr/bin", DEFAULT_ENV_FORMAT).expect("regex"));
    }

    #[test]
    fn test_env_matcher_rejects_missing_value_and_variable() {
        assert!(!check_envs_set("PATH", "PATH=/usr/bin", "PATH=/opt/rh/bin", DEFAULT_ENV_FORMAT).expect("regex"));
        assert!(!check_envs_set("PATH", "HOME=/root", "PATH=/usr/bin", DEFAULT_ENV_FORMAT).expect("regex"));
    }

    #[test]
    fn test_env_matcher_skips_pwd_and_unfiltered() {
        let loop_envs = "PWD=/opt/app-root/src\nHOME=/root\n";
        assert!(check_envs_set(DEFAULT_EXEC_ENV_FILTER, "", loop_envs, DEFAULT_ENV_FORMAT).expect("regex"));
    }

    #[test]
    fn test_env_matcher_twice_format() {
        let loop_envs = "PATH=/opt/rh/rh-ruby/bin:/usr/bin";
        let twice = "PATH=/opt/rh/rh-ruby/bin:/opt/rh/rh-ruby/bin:/usr/bin";
        let once = "PATH=/opt/rh/rh-ruby/bin:/usr/bin";
        assert!(check_envs_set("/rh-ruby", twice, loop_envs, "*VALUE*VALUE*").expect("regex"));
        assert!(!check_envs_set("/rh-ruby", once, loop_envs, "*VALUE*VALUE*").expect("regex"));
    }

    #[test]
    fn test_invalid_filter_is_error() {
        assert!(check_envs_set("(", "", "A=1", DEFAULT_ENV_FORMAT).is_err());
    }

    #[test]
    fn test_binary_check_dockerfile() {
        assert_eq!(
            binary_check_dockerfile("img", "node", "^/opt/rh"),
            "FROM img\nRUN command -v node | grep '^/opt/rh'\n"
        );
    }
}
