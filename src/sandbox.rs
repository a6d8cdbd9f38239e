mod process_tester;
mod tester;

// Re-export the trait and the concrete tester
pub use process_tester::ProcessTester;
pub use tester::Tester;

use std::path::Path;
use std::time::Duration;

use anyhow::{Result, bail};

use crate::config::TesterConfig;

/// Execution options handed to every tester invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestOptions {
    /// Wall-clock limit for a single test
    pub max_execution_duration: Duration,
    /// How many tests of one candidate may run at the same time
    pub num_threads: usize,
    /// Stop scheduling tests once one has failed
    pub stop_on_first_failure: bool,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            max_execution_duration: Duration::from_secs(5),
            num_threads: 1,
            stop_on_first_failure: true,
        }
    }
}

/// Judgement of one test case
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    Failed,
    /// Never executed, e.g. skipped after an earlier failure
    NotRun,
}

/// How the program itself terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramStatus {
    Success,
    Failure,
    TimedOut,
}

/// Whether the sandbox managed to run and observe the program
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxStatus {
    Ok,
    Error(String),
}

impl SandboxStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, SandboxStatus::Ok)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationResult {
    pub program_status: ProgramStatus,
    pub sandbox_status: SandboxStatus,
    /// Diagnostics printed by the compiler
    pub message: String,
}

/// Result of a single test case execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestResult {
    pub outcome: TestOutcome,
    pub program_status: ProgramStatus,
    pub sandbox_status: SandboxStatus,
    pub stdout: String,
    pub duration: Duration,
}

impl TestResult {
    pub fn not_run() -> Self {
        Self {
            outcome: TestOutcome::NotRun,
            program_status: ProgramStatus::Success,
            sandbox_status: SandboxStatus::Ok,
            stdout: String::new(),
            duration: Duration::ZERO,
        }
    }
}

/// Everything one tester invocation produced for one candidate
///
/// `test_results` follows the order of the inputs and is never longer than
/// them. It is empty when compilation failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiTestResult {
    pub compilation_result: CompilationResult,
    pub test_results: Vec<TestResult>,
}

/// Builds one process tester per configured interpreter, in fallback order
pub fn create_testers(configs: &[TesterConfig], work_root: &Path) -> Result<Vec<Box<dyn Tester>>> {
    if configs.is_empty() {
        bail!("At least one tester must be configured");
    }

    configs
        .iter()
        .map(|config| {
            log::info!(
                "Creating tester {} ({})",
                config.name,
                config.interpreter.display()
            );
            let tester = ProcessTester::build(config, work_root)?;
            Ok(Box::new(tester) as Box<dyn Tester>)
        })
        .collect()
}
