//! Checks that imagestream JSON files reference the latest image version.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::config::env_trim;
use crate::errors::{CiError, Result};

pub const IMAGESTREAMS_DIR: &str = "imagestreams";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TagFrom {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IsTag {
    pub name: String,
    pub from: TagFrom,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct IsSpec {
    tags: Vec<IsTag>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ImageStreamFile {
    spec: IsSpec,
}

impl ImageStreamFile {
    pub fn tags(&self) -> &[IsTag] {
        &self.spec.tags
    }
}

/// `<stream>`, `<stream>-elX` and `<stream>-ubiX` all count as `version`.
fn matches_version(name: &str, version: &str) -> bool {
    name == version
        || name
            .strip_prefix(version)
            .is_some_and(|rest| rest.starts_with('-'))
}

#[derive(Debug, Clone)]
pub struct ImageStreamEngine {
    working_dir: PathBuf,
    version: String,
    failed: Vec<PathBuf>,
}

impl ImageStreamEngine {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            version: String::new(),
            failed: Vec::new(),
        }
    }

    /// Last entry of the Makefile's `VERSIONS =` line.
    pub fn get_latest_version(&self) -> Result<String> {
        println!("Working dir for latest imagestream is {}.", self.working_dir.display());
        let makefile = fs::read_to_string(self.working_dir.join("Makefile"))?;
        let latest = makefile
            .lines()
            .filter_map(|l| l.strip_prefix("VERSIONS ="))
            .filter_map(|v| v.split_whitespace().last())
            .last()
            .map(str::to_string)
            .ok_or_else(|| CiError::NotFound("VERSIONS in Makefile".to_string()))?;
        println!("The latest version is {latest}.");
        Ok(latest)
    }

    pub fn load_json_file(&self, path: &Path) -> Result<ImageStreamFile> {
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    /// Tags naming the current version.
    pub fn check_version<'a>(&self, is: &'a ImageStreamFile) -> Vec<&'a IsTag> {
        is.tags()
            .iter()
            .filter(|t| {
                println!(
                    "check_version: Compare tags['name']:'{}' against version:'{}'",
                    t.name, self.version
                );
                matches_version(&t.name, &self.version)
            })
            .collect()
    }

    /// The `latest` tag points at the current version.
    pub fn check_latest_tag(&self, is: &ImageStreamFile) -> bool {
        let found = is
            .tags()
            .iter()
            .filter(|t| t.name == "latest")
            .any(|t| matches_version(&t.from.name, &self.version));
        if found {
            println!("Latest tag found.");
        }
        found
    }

    /// Files that failed the last `check_imagestreams` run.
    pub fn failed_files(&self) -> &[PathBuf] {
        &self.failed
    }

    /// Check every `<dir>/imagestreams/*.json`; 0 when all carry `version` and a matching `latest`, else 1.
    pub fn check_imagestreams(&mut self, dir: &Path, version: &str) -> Result<i32> {
        self.version = version.to_string();
        self.failed.clear();
        let is_dir = dir.join(IMAGESTREAMS_DIR);
        let mut files: Vec<PathBuf> = match fs::read_dir(&is_dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|e| e == "json"))
                .collect(),
            Err(_) => Vec::new(),
        };
        files.sort();
        if files.is_empty() {
            println!("No json files present in {IMAGESTREAMS_DIR}.");
            return Ok(0);
        }
        let legacy_target = matches!(env_trim("TARGET").as_deref(), Some("rhel7" | "centos7"));
        for file in files {
            if legacy_target && file.to_string_lossy().contains("aarch64") {
                println!("Imagestream aarch64 is not supported on rhel7");
                continue;
            }
            println!("Checking file {}.", file.display());
            let is = self.load_json_file(&file)?;
            if self.check_version(&is).is_empty() || !self.check_latest_tag(&is) {
                println!(
                    "The latest version is not present in {} or in latest tag.",
                    file.display()
                );
                self.failed.push(file);
            }
        }
        if !self.failed.is_empty() {
            return Ok(1);
        }
        println!("Imagestreams contains the latest version.");
        Ok(0)
    }
}
