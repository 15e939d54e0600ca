#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use container_ci_suite::errors::Result;
use container_ci_suite::util::exec::{CommandRunner, ExecOutput, ExecRequest};
use container_ci_suite::{ContainerEngine, Settings, Timing};

#[derive(Debug)]
struct Rule {
    needle: String,
    code: i32,
    output: String,
    once: bool,
}

/// CommandRunner that answers from a list of `needle -> (code, output)` rules.
///
/// The first rule whose needle occurs in the command line wins; unmatched commands
/// succeed with empty output. Every command line is recorded.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<String>>,
    cid: Mutex<Option<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on(&self, needle: &str, code: i32, output: &str) -> &Self {
        self.push(needle, code, output, false)
    }

    /// Rule consumed by its first match.
    pub fn once(&self, needle: &str, code: i32, output: &str) -> &Self {
        self.push(needle, code, output, true)
    }

    fn push(&self, needle: &str, code: i32, output: &str, once: bool) -> &Self {
        self.rules.lock().expect("rules lock").push(Rule {
            needle: needle.to_string(),
            code,
            output: output.to_string(),
            once,
        });
        self
    }

    /// Successful commands carrying `--cidfile=<path>` write `cid` there, like the engine does.
    pub fn write_cidfiles(&self, cid: &str) -> &Self {
        *self.cid.lock().expect("cid lock") = Some(cid.to_string());
        self
    }

    fn maybe_write_cidfile(&self, command: &str) {
        let Some(cid) = self.cid.lock().expect("cid lock").clone() else {
            return;
        };
        let path = command
            .split("--cidfile=")
            .nth(1)
            .and_then(|rest| rest.split_whitespace().next());
        if let Some(path) = path {
            std::fs::write(path, cid).expect("cid file written");
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn called(&self, needle: &str) -> bool {
        self.calls().iter().any(|c| c.contains(needle))
    }

    pub fn count(&self, needle: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(needle)).count()
    }
}

impl CommandRunner for ScriptedRunner {
    fn execute(&self, request: &ExecRequest) -> Result<ExecOutput> {
        let command = request.command().to_string();
        self.calls.lock().expect("calls lock").push(command.clone());
        let mut rules = self.rules.lock().expect("rules lock");
        let (code, output) = match rules.iter().position(|r| command.contains(&r.needle)) {
            Some(idx) => {
                let answer = (rules[idx].code, rules[idx].output.clone());
                if rules[idx].once {
                    rules.remove(idx);
                }
                answer
            }
            None => (0, String::new()),
        };
        drop(rules);
        if code == 0 {
            self.maybe_write_cidfile(&command);
        }
        Ok(ExecOutput {
            code,
            output: if request.captures_output() { output } else { String::new() },
            ..ExecOutput::default()
        })
    }
}

pub fn engine(runner: &Arc<ScriptedRunner>) -> ContainerEngine {
    ContainerEngine::new("podman", runner.clone())
}

/// Settings with zero poll intervals and a CA path that never exists.
pub fn settings() -> Settings {
    Settings {
        ca_file_path: PathBuf::from("/nonexistent/ca.crt"),
        ..Settings::default()
    }
    .with_timing(Timing::immediate())
}

pub fn data_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests").join("data")
}

pub fn fixture(name: &str) -> String {
    std::fs::read_to_string(data_dir().join(name)).expect("fixture readable")
}
