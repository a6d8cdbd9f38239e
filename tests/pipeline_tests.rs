use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::Result;
use assert_json_diff::assert_json_eq;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use cceval::candidates::{CandidateIndex, CandidateSolution, load_candidates};
use cceval::dataset::{self, find_problem};
use cceval::orchestrator::Orchestrator;
use cceval::report::{ScanState, write_results};
use cceval::sandbox::{
    CompilationResult, MultiTestResult, ProgramStatus, SandboxStatus, TestOptions, TestOutcome,
    TestResult, Tester,
};

static SCRATCH_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Temporary directory holding the files of one test, removed on drop
struct Scratch {
    path: PathBuf,
}

impl Scratch {
    fn new() -> Self {
        let id = SCRATCH_COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "cceval-pipeline-test-{}-{id}",
            std::process::id()
        ));
        fs::create_dir_all(&path).unwrap();
        Self { path }
    }

    fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.path.join(name);
        fs::write(&path, contents).unwrap();
        path
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

/// Passes programs containing the marker and fails every test otherwise
struct MarkerTester {
    name: &'static str,
    marker: &'static str,
}

impl Tester for MarkerTester {
    fn name(&self) -> &str {
        self.name
    }

    fn test(
        &self,
        source: &str,
        inputs: &[&str],
        _options: TestOptions,
        _outputs: &[&str],
    ) -> Result<MultiTestResult> {
        let outcome = if source.contains(self.marker) {
            TestOutcome::Passed
        } else {
            TestOutcome::Failed
        };
        Ok(MultiTestResult {
            compilation_result: CompilationResult {
                program_status: ProgramStatus::Success,
                sandbox_status: SandboxStatus::Ok,
                message: String::new(),
            },
            test_results: inputs
                .iter()
                .map(|_| TestResult {
                    outcome,
                    program_status: ProgramStatus::Success,
                    sandbox_status: SandboxStatus::Ok,
                    stdout: String::new(),
                    duration: Duration::from_millis(1),
                })
                .collect(),
        })
    }
}

fn orchestrator() -> Orchestrator {
    let strategies: Vec<Box<dyn Tester>> = vec![
        Box::new(MarkerTester {
            name: "python3",
            marker: "print(",
        }),
        Box::new(MarkerTester {
            name: "python2",
            marker: "print ",
        }),
    ];
    Orchestrator::new(strategies, TestOptions::default()).unwrap()
}

fn record(name: &str) -> String {
    json!({
        "name": name,
        "public_tests": [{"input": "1\n5\n", "output": "2 4\n"}],
        "private_tests": [{"input": "1\n7\n", "output": "2 6\n"}],
        "solutions": [{"language": "PYTHON3", "solution": "print(2, 4)"}]
    })
    .to_string()
}

/// Two shards: alpha and beta in the first, gamma in the second
fn write_shards(scratch: &Scratch) -> Vec<PathBuf> {
    vec![
        scratch.write(
            "code_contests_test.jsonl",
            &format!("{}\n{}\n", record("alpha"), record("beta")),
        ),
        scratch.write("code_contests_valid.jsonl", &format!("{}\n", record("gamma"))),
    ]
}

fn read_json(path: &Path) -> Value {
    serde_json::from_reader(fs::File::open(path).unwrap()).unwrap()
}

#[test]
fn test_keyed_batch_against_sharded_dataset() {
    let scratch = Scratch::new();
    let shards = write_shards(&scratch);
    let batch = scratch.write(
        "batch.json",
        &json!({
            "run": [
                {"id": "gamma", "model_completions": ["print(3)"]},
                {"id": "alpha", "model_completions": ["print(1)", "print 1", "exit()"]},
                {"id": "delta", "model_completions": ["print(4)"]}
            ]
        })
        .to_string(),
    );
    let output = scratch.path.join("results.json");

    let mut candidates = load_candidates(&batch).unwrap();
    assert_eq!(candidates.len(), 5);
    let index = CandidateIndex::build(&candidates);
    let mut state = ScanState::new(None);

    orchestrator()
        .solve_all(
            dataset::problems(&shards),
            &index,
            &mut candidates,
            &mut state,
        )
        .unwrap();
    assert_eq!((state.num_passed(), state.num_failed()), (3, 1));
    write_results(&output, &state.into_batch()).unwrap();

    // Stream order first (alpha in shard one, gamma in shard two), then batch order
    assert_json_eq!(
        read_json(&output),
        json!({
            "results": [
                {"id": "alpha", "generated": "print(1)", "passed": true},
                {"id": "alpha", "generated": "print 1", "passed": true},
                {"id": "alpha", "generated": "exit()", "passed": false},
                {"id": "gamma", "generated": "print(3)", "passed": true}
            ]
        })
    );

    let delta = candidates.iter().find(|c| c.id == "delta").unwrap();
    assert!(!delta.evaluated);
}

#[test]
fn test_indexed_batch_keeps_generation_index() {
    let scratch = Scratch::new();
    let shards = write_shards(&scratch);
    let batch = scratch.write(
        "batch.json",
        &json!([
            {"index": 7, "name": "beta", "completion": "print 2"},
            {"index": 8, "name": "beta", "completion": "pass"}
        ])
        .to_string(),
    );
    let output = scratch.path.join("results.json");

    let mut candidates = load_candidates(&batch).unwrap();
    let index = CandidateIndex::build(&candidates);
    let mut state = ScanState::new(Some(1));

    orchestrator()
        .solve_all(
            dataset::problems(&shards),
            &index,
            &mut candidates,
            &mut state,
        )
        .unwrap();
    write_results(&output, &state.into_batch()).unwrap();

    assert_json_eq!(
        read_json(&output),
        json!({
            "results": [
                {"id": "beta", "index": 7, "generated": "print 2", "passed": true}
            ]
        })
    );
}

#[test]
fn test_find_problem_across_shards() {
    let scratch = Scratch::new();
    let shards = write_shards(&scratch);

    let problem = find_problem(dataset::problems(&shards), "gamma").unwrap();
    assert_eq!(problem.name, "gamma");
    assert_eq!(
        dataset::get_inputs(&problem, None),
        vec!["1\n5\n", "1\n7\n"]
    );

    let names: Vec<String> = dataset::problems(&shards)
        .map(|problem| problem.unwrap().name)
        .collect();
    assert_eq!(names, vec!["alpha", "beta", "gamma"]);
}

#[test]
fn test_missing_dataset_file_is_an_error() {
    let scratch = Scratch::new();
    let mut shards = write_shards(&scratch);
    shards.insert(1, scratch.path.join("absent.jsonl"));

    let items: Vec<Result<_>> = dataset::problems(&shards).collect();
    assert!(items[0].is_ok() && items[1].is_ok());
    let err = items[2].as_ref().unwrap_err();
    assert!(err.to_string().contains("Failed to open dataset"));

    let mut candidates: Vec<CandidateSolution> = Vec::new();
    let mut state = ScanState::new(None);
    let result = orchestrator().solve_all(
        dataset::problems(&shards),
        &CandidateIndex::build(&candidates),
        &mut candidates,
        &mut state,
    );
    assert!(result.is_err());
}

#[test]
fn test_missing_batch_file_is_an_error() {
    let scratch = Scratch::new();
    assert!(load_candidates(scratch.path.join("absent.json")).is_err());

    let malformed = scratch.write("batch.json", r#"{"run": [{"id": 3}]}"#);
    let err = load_candidates(&malformed).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<cceval::errors::Error>(),
        Some(cceval::errors::Error::ParseFailure(_))
    ));
}

#[cfg(unix)]
#[test]
fn test_create_testers_keeps_configured_order() {
    use std::os::unix::fs::PermissionsExt;

    use cceval::config::TesterConfig;
    use cceval::sandbox::create_testers;

    let scratch = Scratch::new();
    let configs: Vec<TesterConfig> = ["first", "second"]
        .iter()
        .map(|name| {
            let interpreter = scratch.write(&format!("{name}.sh"), "#!/bin/sh\nexit 0\n");
            fs::set_permissions(&interpreter, fs::Permissions::from_mode(0o755)).unwrap();
            TesterConfig {
                name: name.to_string(),
                interpreter,
                args: Vec::new(),
                library_paths: Vec::new(),
            }
        })
        .collect();

    let testers = create_testers(&configs, &scratch.path.join("runs")).unwrap();
    let names: Vec<&str> = testers.iter().map(|t| t.name()).collect();
    assert_eq!(names, vec!["first", "second"]);
    assert!(scratch.path.join("runs").join("second").is_dir());

    assert!(create_testers(&[], &scratch.path).is_err());
}
