//! Local git repository setup for S2I sources.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::errors::Result;
use crate::util::exec::{CommandRunner, ExecRequest};
use crate::util::shell_escape;

pub const DEFAULT_COMMIT_MESSAGE: &str = "init commit";
pub const DEFAULT_USERNAME: &str = "builder";
pub const DEFAULT_MAIL: &str = "build@localhost";

#[derive(Debug, Clone)]
pub struct GitRepo {
    path: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl GitRepo {
    pub fn new(path: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            path: path.into(),
            runner,
        }
    }

    /// Like `new`, creating the directory first.
    pub fn create_dir(path: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Result<Self> {
        let path = path.into();
        info!("Creating git repo in path {}", path.display());
        fs::create_dir_all(&path)?;
        Ok(Self::new(path, runner))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn git(&self, args: &str) -> Result<()> {
        self.runner
            .run(ExecRequest::new(format!("git {args}")).cwd(&self.path))
            .map(|_| ())
    }

    pub fn init(&self) -> Result<()> {
        self.git("init")
    }

    pub fn add_config(&self, username: &str, mail: &str) -> Result<()> {
        info!("Adding to repo username {username} and email {mail}");
        self.git(&format!("config user.name {}", shell_escape(username)))?;
        self.git(&format!("config user.email {}", shell_escape(mail)))
    }

    pub fn add_files(&self) -> Result<()> {
        self.git("add -A")
    }

    pub fn commit_files(&self, message: &str) -> Result<()> {
        info!("Commit changes to git repo by commit message {message}");
        self.git(&format!("commit -am {}", shell_escape(message)))
    }

    /// `git init`, identity config (when both are given), `add -A`, `commit -am`.
    pub fn create_repo(&self, message: &str, username: &str, mail: &str) -> bool {
        let result = self.init().and_then(|_| {
            if !username.is_empty() && !mail.is_empty() {
                self.add_config(username, mail)?;
            }
            self.add_files()?;
            self.commit_files(message)
        });
        if result.is_err() {
            println!("Git repo initialization FAILED.");
        }
        result.is_ok()
    }
}
