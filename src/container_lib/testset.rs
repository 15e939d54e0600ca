//! Running named test cases and summarizing their results.

use tracing::error;

use super::ContainerTestLib;
use crate::errors::{exit_code_for_error, Result};
use crate::util::{timestamp_diff, timestamp_pretty, timestamp_s, LINE};

pub type TestFn<'a> = Box<dyn FnMut(&mut ContainerTestLib) -> Result<bool> + 'a>;

/// A named test case of a test set.
pub struct TestCase<'a> {
    pub name: String,
    run: TestFn<'a>,
}

impl<'a> TestCase<'a> {
    pub fn new<F>(name: impl Into<String>, run: F) -> Self
    where
        F: FnMut(&mut ContainerTestLib) -> Result<bool> + 'a,
    {
        Self {
            name: name.into(),
            run: Box::new(run),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    Failed,
    /// Failed, but listed in UNSTABLE_TESTS while IGNORE_UNSTABLE_TESTS is set.
    FailedUnstableIgnored,
}

impl TestOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            TestOutcome::Passed => "[PASSED]",
            TestOutcome::Failed => "[FAILED]",
            TestOutcome::FailedUnstableIgnored => "[FAILED][UNSTABLE-IGNORED]",
        }
    }
}

/// Accumulated result lines plus the overall suite status (0 = success).
#[derive(Debug, Clone, Default)]
pub struct TestSummary {
    pub text: String,
    pub suite_result: i32,
}

/// One summary line: `<msg> for '<app>' <case> (<diff>)`.
pub fn format_result_line(test_msg: &str, app_name: &str, test_case: &str, time_diff: &str) -> String {
    format!("{test_msg} for '{app_name}' {test_case} ({time_diff})\n")
}

impl ContainerTestLib {
    pub fn summary(&self) -> &TestSummary {
        &self.summary
    }

    pub fn update_test_result(&mut self, test_msg: &str, app_name: &str, test_case: &str, time_diff: &str) {
        self.summary
            .text
            .push_str(&format_result_line(test_msg, app_name, test_case, time_diff));
    }

    /// Mark the suite failed for a non-zero `result`; returns `result` unchanged.
    pub fn check_testcase_result(&mut self, result: i32) -> i32 {
        if result != 0 {
            println!(
                "Test for image '{}' FAILED (exit code: {result})",
                self.image_name
            );
            self.summary.suite_result = 1;
        }
        result
    }

    fn outcome_for(&self, passed: bool, app_name: &str, test_case: &str) -> TestOutcome {
        if passed {
            TestOutcome::Passed
        } else if self.settings.ignore_unstable_tests
            && (self.settings.is_unstable(app_name) || self.settings.is_unstable(test_case))
        {
            TestOutcome::FailedUnstableIgnored
        } else {
            TestOutcome::Failed
        }
    }

    /// Run every case, timing it and appending a summary line.
    pub fn run_tests_from_testset(&mut self, app_name: &str, test_set: Vec<TestCase<'_>>) {
        println!();
        let _ = self.engine.runner().status("git show -s");
        println!();
        println!("Running tests for image {}", self.image_name);

        for mut case in test_set {
            let time_beg_pretty = timestamp_pretty();
            let time_beg = timestamp_s();
            println!("-----------------------------------------------");
            println!("Running test {} (starting at {time_beg_pretty}) ... ", case.name);
            println!("-----------------------------------------------");

            let result = match (case.run)(self) {
                Ok(true) => 0,
                Ok(false) => 1,
                Err(e) => {
                    error!("Test {} failed with error: {e}", case.name);
                    exit_code_for_error(&e)
                }
            };
            let outcome = self.outcome_for(result == 0, app_name, &case.name);
            if outcome == TestOutcome::Failed {
                self.check_testcase_result(result);
            }
            let mut diff = timestamp_diff(time_beg, timestamp_s());
            if result > 1 {
                diff.push_str(&format!(", exit code {result}"));
            }
            self.update_test_result(outcome.label(), app_name, &case.name, &diff);
        }
    }

    pub fn show_results(&self) {
        println!("{LINE}");
        if !self.image_name.is_empty() {
            println!("Tests were run for image {}", self.image_name);
        }
        println!("{LINE}");
        println!("Test cases results:");
        println!();
        println!("{}", self.summary.text);
        if self.summary.suite_result == 0 {
            println!("Tests for {} succeeded.", self.image_name);
        } else {
            println!("Tests for {} failed.", self.image_name);
        }
    }
}
