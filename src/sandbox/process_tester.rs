use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use chrono::Local;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::process::{ChildStdin, Command};
use tokio::runtime::Handle;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::TesterConfig;
use crate::errors::SandboxFailure;

use super::{
    CompilationResult, MultiTestResult, ProgramStatus, SandboxStatus, TestOptions, TestOutcome,
    TestResult, Tester,
};

const COMPILE_TIME_LIMIT: Duration = Duration::from_secs(30);
const SOURCE_NAME: &str = "main.py";

/// A tester that runs a Python interpreter as a plain child process
///
/// Every invocation gets its own run directory below the tester's work
/// directory. "Compilation" is a `py_compile` syntax check; each test is a
/// fresh interpreter process fed through stdin and killed when it exceeds the
/// wall-clock limit. There is no memory, file system or permission control.
///
/// `test` drives its work on the current tokio runtime with `block_on`, so it
/// must be called from a blocking context such as `spawn_blocking`.
pub struct ProcessTester {
    name: String,
    interpreter: PathBuf,
    args: Vec<String>,
    /// Value for `PYTHONPATH`, built from the configured library paths
    python_path: Option<OsString>,
    work_dir: PathBuf,
    invocations: AtomicU64,
}

/// One test case handed to a spawned task
struct PendingCase {
    index: usize,
    input: String,
    expected: String,
    stdout_path: PathBuf,
}

impl Tester for ProcessTester {
    fn name(&self) -> &str {
        &self.name
    }

    fn test(
        &self,
        source: &str,
        inputs: &[&str],
        options: TestOptions,
        outputs: &[&str],
    ) -> Result<MultiTestResult> {
        if inputs.len() != outputs.len() {
            bail!(
                "Got {} inputs but {} expected outputs",
                inputs.len(),
                outputs.len()
            );
        }

        let handle = Handle::try_current()
            .map_err(|e| anyhow!("ProcessTester needs a tokio runtime: {e}"))?;

        let run_dir = self.create_run_dir()?;
        let result = handle.block_on(self.run(&run_dir, source, inputs, options, outputs));
        self.cleanup_run_dir(&run_dir);

        result
    }
}

impl ProcessTester {
    /// Creates the tester's work directory and checks that the interpreter runs
    ///
    /// An interpreter that cannot execute `-c pass` is a `SandboxFailure`.
    pub fn build(config: &TesterConfig, work_root: &Path) -> Result<Self> {
        check_interpreter(config)?;
        let tester = Self::from_config(config, work_root)?;
        log::info!(
            "Tester {} ready, running {} without isolation",
            tester.name,
            tester.interpreter.display()
        );
        Ok(tester)
    }

    fn from_config(config: &TesterConfig, work_root: &Path) -> Result<Self> {
        let work_dir = work_root.join(&config.name);
        fs::create_dir_all(&work_dir)
            .with_context(|| format!("Failed to create work directory {}", work_dir.display()))?;

        let python_path = if config.library_paths.is_empty() {
            None
        } else {
            let joined = std::env::join_paths(&config.library_paths)
                .with_context(|| format!("Invalid library paths for tester {}", config.name))?;
            Some(joined)
        };

        Ok(Self {
            name: config.name.clone(),
            interpreter: config.interpreter.clone(),
            args: config.args.clone(),
            python_path,
            work_dir,
            invocations: AtomicU64::new(0),
        })
    }

    /// Base interpreter command, run inside `run_dir`
    fn command(&self, run_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.interpreter);
        cmd.args(&self.args)
            .current_dir(run_dir)
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .kill_on_drop(true);
        if let Some(python_path) = &self.python_path {
            cmd.env("PYTHONPATH", python_path);
        }
        cmd
    }

    /// Creates a fresh directory for one invocation
    fn create_run_dir(&self) -> Result<PathBuf> {
        let run_dir = self.work_dir.join(format!(
            "{}-{}",
            Local::now().format("%y%m%d-%H-%M-%S"),
            self.invocations.fetch_add(1, Ordering::Relaxed)
        ));
        fs::create_dir_all(&run_dir)
            .with_context(|| format!("Failed to create run directory {}", run_dir.display()))?;
        Ok(run_dir)
    }

    fn cleanup_run_dir(&self, run_dir: &Path) {
        match fs::remove_dir_all(run_dir) {
            Ok(()) => log::debug!("Removed run directory {}", run_dir.display()),
            Err(e) => log::warn!("Failed to remove run directory {}: {e}", run_dir.display()),
        }
    }

    async fn run(
        &self,
        run_dir: &Path,
        source: &str,
        inputs: &[&str],
        options: TestOptions,
        outputs: &[&str],
    ) -> Result<MultiTestResult> {
        fs::write(run_dir.join(SOURCE_NAME), format!("{source}\n"))?;

        // Step 1: Compile the source code
        let compilation_result = self.compile(run_dir).await?;
        if compilation_result.program_status != ProgramStatus::Success {
            return Ok(MultiTestResult {
                compilation_result,
                test_results: Vec::new(),
            });
        }

        // Step 2: Run test cases
        let test_results = self
            .run_test_cases(run_dir, inputs, options, outputs)
            .await?;

        Ok(MultiTestResult {
            compilation_result,
            test_results,
        })
    }

    /// Syntax-checks the source with the tester's own interpreter
    async fn compile(&self, run_dir: &Path) -> Result<CompilationResult> {
        let mut cmd = self.command(run_dir);
        cmd.args(["-m", "py_compile", SOURCE_NAME])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = cmd.spawn().with_context(|| {
            format!(
                "Failed to spawn {} for compilation",
                self.interpreter.display()
            )
        })?;

        match timeout(COMPILE_TIME_LIMIT, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let mut message = String::from_utf8_lossy(&output.stdout).into_owned();
                message.push_str(&String::from_utf8_lossy(&output.stderr));
                // py_compile exits with 1 on a syntax error; anything else is the interpreter
                let program_status = match output.status.code() {
                    Some(0) => ProgramStatus::Success,
                    Some(1) => ProgramStatus::Failure,
                    code => bail!(
                        "{} exited with {} while compiling: {}",
                        self.interpreter.display(),
                        code.map_or_else(|| "a signal".to_string(), |c| format!("status {c}")),
                        message.trim()
                    ),
                };
                Ok(CompilationResult {
                    program_status,
                    sandbox_status: SandboxStatus::Ok,
                    message,
                })
            }
            Ok(Err(e)) => Err(anyhow!("Compilation process error: {e}")),
            Err(_) => Ok(CompilationResult {
                program_status: ProgramStatus::TimedOut,
                sandbox_status: SandboxStatus::Ok,
                message: "Compilation timeout".to_string(),
            }),
        }
    }

    /// Runs the tests with at most `num_threads` processes in flight
    ///
    /// Under `stop_on_first_failure` the first unsuccessful test cancels the
    /// running ones and nothing new is scheduled; the returned list is then cut
    /// after the last test that actually executed.
    async fn run_test_cases(
        &self,
        run_dir: &Path,
        inputs: &[&str],
        options: TestOptions,
        outputs: &[&str],
    ) -> Result<Vec<TestResult>> {
        let token = CancellationToken::new();
        let parallelism = options.num_threads.max(1);
        let mut results = vec![TestResult::not_run(); inputs.len()];
        let mut in_flight = JoinSet::new();
        let mut next_case = 0;
        let mut executed = 0;
        let mut stopped = false;

        loop {
            while !stopped && next_case < inputs.len() && in_flight.len() < parallelism {
                let case = PendingCase {
                    index: next_case,
                    input: inputs[next_case].to_string(),
                    expected: outputs[next_case].to_string(),
                    stdout_path: run_dir.join(format!("{next_case}.out")),
                };
                let mut cmd = self.command(run_dir);
                cmd.arg(SOURCE_NAME);

                in_flight.spawn(run_single_test_case(
                    cmd,
                    case,
                    options.max_execution_duration,
                    token.clone(),
                ));
                next_case += 1;
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            let (index, result) = joined.context("Test case task failed")??;

            // `None` means the test was cancelled before it finished
            let Some(result) = result else {
                continue;
            };

            executed = executed.max(index + 1);
            if result.outcome != TestOutcome::Passed && options.stop_on_first_failure && !stopped
            {
                log::debug!("Test {index} did not pass, stopping remaining tests");
                stopped = true;
                token.cancel();
            }
            results[index] = result;
        }

        if stopped {
            results.truncate(executed);
        }
        Ok(results)
    }
}

/// Runs one test case to completion, timeout or cancellation
async fn run_single_test_case(
    mut cmd: Command,
    case: PendingCase,
    limit: Duration,
    token: CancellationToken,
) -> Result<(usize, Option<TestResult>)> {
    let PendingCase {
        index,
        input,
        expected,
        stdout_path,
    } = case;

    if token.is_cancelled() {
        return Ok((index, None));
    }

    let stdout_file = fs::File::create(&stdout_path)
        .with_context(|| format!("Failed to create {}", stdout_path.display()))?;
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::from(stdout_file))
        .stderr(Stdio::null());

    let start_time = Instant::now();
    let mut child = cmd.spawn().context("Failed to spawn test process")?;
    let stdin = child.stdin.take();

    let execution = async {
        if let Some(stdin) = stdin {
            // The program may exit without reading all of its input
            if let Err(e) = write_input(stdin, &input).await {
                if e.kind() != ErrorKind::BrokenPipe {
                    return Err(e);
                }
            }
        }
        child.wait().await
    };

    let execution_result = tokio::select! {
        _ = token.cancelled() => return Ok((index, None)),
        res = timeout(limit, execution) => res,
    };
    let duration = start_time.elapsed();

    let result = match execution_result {
        Err(_) => {
            let _ = child.start_kill();
            TestResult {
                outcome: TestOutcome::Failed,
                program_status: ProgramStatus::TimedOut,
                sandbox_status: SandboxStatus::Ok,
                stdout: String::new(),
                duration,
            }
        }
        Ok(Err(e)) => return Err(anyhow!(e).context("Test process error")),
        Ok(Ok(exit_status)) => {
            let program_status = if exit_status.success() {
                ProgramStatus::Success
            } else {
                ProgramStatus::Failure
            };

            match tokio::fs::read(&stdout_path).await {
                Ok(bytes) => {
                    let stdout = String::from_utf8_lossy(&bytes).into_owned();
                    let outcome = if program_status == ProgramStatus::Success
                        && outputs_match(&stdout, &expected)
                    {
                        TestOutcome::Passed
                    } else {
                        TestOutcome::Failed
                    };
                    TestResult {
                        outcome,
                        program_status,
                        sandbox_status: SandboxStatus::Ok,
                        stdout,
                        duration,
                    }
                }
                Err(e) => {
                    log::error!("Failed to read output file: {e}");
                    TestResult {
                        outcome: TestOutcome::NotRun,
                        program_status,
                        sandbox_status: SandboxStatus::Error(format!(
                            "Failed to read output file: {e}"
                        )),
                        stdout: String::new(),
                        duration,
                    }
                }
            }
        }
    };

    Ok((index, Some(result)))
}

async fn write_input(stdin: ChildStdin, input: &str) -> std::io::Result<()> {
    let mut writer = BufWriter::new(stdin);
    writer.write_all(input.as_bytes()).await?;
    writer.flush().await
}

/// Runs `interpreter [args] -c pass` once and fails unless it exits cleanly
fn check_interpreter(config: &TesterConfig) -> Result<()> {
    let output = std::process::Command::new(&config.interpreter)
        .args(&config.args)
        .args(["-c", "pass"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| {
            SandboxFailure(format!(
                "{} tester: cannot start {}: {e}",
                config.name,
                config.interpreter.display()
            ))
        })?;

    if !output.status.success() {
        return Err(SandboxFailure(format!(
            "{} tester: {} is not usable ({}): {}",
            config.name,
            config.interpreter.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ))
        .into());
    }
    Ok(())
}

/// Lines with trailing whitespace removed, without trailing blank lines
fn significant_lines(text: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    lines
}

fn outputs_match(actual: &str, expected: &str) -> bool {
    significant_lines(actual) == significant_lines(expected)
}
