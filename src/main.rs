use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::Parser;

use cceval::candidates::{CandidateIndex, load_candidates};
use cceval::config::{CliArgs, DatasetArgs, Mode};
use cceval::dataset::{self, find_problem, get_inputs, get_outputs};
use cceval::orchestrator::Orchestrator;
use cceval::report::{ScanState, write_results};
use cceval::sandbox::{TestOptions, Tester, create_testers};
use cceval::verdict::report_results;

/// Sample programs for the demo, with what each one is expected to show
const DEMO_FIXTURES: [(&str, &str); 3] = [
    (
        "invalid.py",
        "A program that does not compile is reported as not compiling:",
    ),
    (
        "bad.py",
        "This program passes a few tests and then fails. With stop_on_first_failure\n\
         set, the tester stops once it sees a failure; with several threads more\n\
         than one failure may be observed before everything stops.",
    ),
    ("good.py", "A correct program passes all tests:"),
];

const SEPARATOR: &str =
    "--------------------------------------------------------------------------------";

#[tokio::main]
async fn main() {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();

    // Testers block on the runtime, so the whole scan runs off the async workers
    let outcome = match tokio::task::spawn_blocking(move || run(cli)).await {
        Ok(result) => result,
        Err(e) => Err(anyhow!("Evaluation task terminated unexpectedly: {e}")),
    };

    if let Err(e) = outcome {
        log::error!("{e:?}");
        eprintln!("Failed: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: CliArgs) -> Result<()> {
    let config = cli.to_config()?;
    let work_root = config.resolve_work_dir()?;
    let testers = create_testers(&config.testers, &work_root)?;
    let orchestrator = Orchestrator::new(testers, TestOptions::from(config.options))?;

    match cli.mode {
        Mode::SolveAll {
            input,
            output,
            dataset,
            max_per_problem,
        } => solve_all(&orchestrator, &input, &output, &dataset, max_per_problem),
        Mode::Reference {
            dataset,
            problems,
            max_per_problem,
            max_solutions,
        } => solve_reference(
            &orchestrator,
            &dataset,
            &problems,
            max_per_problem,
            max_solutions,
        ),
        Mode::Demo {
            dataset,
            problem,
            fixtures,
            max_tests,
        } => solve_demo(
            orchestrator.primary(),
            orchestrator.options(),
            &dataset,
            &problem,
            &fixtures,
            max_tests,
        ),
    }
}

fn solve_all(
    orchestrator: &Orchestrator,
    input: &Path,
    output: &Path,
    dataset: &DatasetArgs,
    max_per_problem: Option<usize>,
) -> Result<()> {
    let files = dataset.files()?;

    // A malformed batch must abort before anything is evaluated
    let mut candidates = load_candidates(input)?;
    println!(
        "parsed {} candidate solution(s) from {}",
        candidates.len(),
        input.display()
    );

    let index = CandidateIndex::build(&candidates);
    let mut state = ScanState::new(max_per_problem);
    orchestrator.solve_all(
        dataset::problems(&files),
        &index,
        &mut candidates,
        &mut state,
    )?;

    let unevaluated = candidates.iter().filter(|c| !c.evaluated).count();
    if unevaluated > 0 {
        log::warn!("{unevaluated} candidate(s) were not evaluated");
    }

    println!(
        "{} passed, {} failed",
        state.num_passed(),
        state.num_failed()
    );
    println!("writing output to: {}", output.display());
    write_results(output, &state.into_batch())
}

fn solve_reference(
    orchestrator: &Orchestrator,
    dataset: &DatasetArgs,
    problems: &[String],
    max_per_problem: usize,
    max_solutions: Option<usize>,
) -> Result<()> {
    let files = dataset.files()?;
    let mut state = ScanState::new(Some(max_per_problem));
    orchestrator.solve_reference(
        dataset::problems(&files),
        problems,
        max_solutions,
        &mut state,
    )?;

    for tally in &state.tallies {
        println!("{}", tally.name);
        println!("{}", tally.summary_line());
        println!("Total duration: {:?}", tally.duration);
    }
    for line in state.tally_lines() {
        println!("{line}");
    }
    Ok(())
}

fn solve_demo(
    tester: &dyn Tester,
    options: TestOptions,
    dataset: &DatasetArgs,
    problem_name: &str,
    fixtures: &Path,
    max_tests: usize,
) -> Result<()> {
    let files = dataset.files()?;
    let problem = find_problem(dataset::problems(&files), problem_name)?;
    let inputs = get_inputs(&problem, Some(max_tests));
    let outputs = get_outputs(&problem, Some(max_tests));

    let programs = DEMO_FIXTURES
        .iter()
        .map(|(file_name, narrative)| {
            let path: PathBuf = fixtures.join(file_name);
            let source = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read fixture {}", path.display()))?;
            Ok((source, *narrative))
        })
        .collect::<Result<Vec<_>>>()?;

    println!(
        "We will try to solve {:?} with {} test(s), running each program under {}.",
        problem.name,
        inputs.len(),
        tester.name()
    );

    for (source, narrative) in &programs {
        println!("\n{SEPARATOR}\n{narrative}\n");
        let result = tester.test(source, &inputs, options, &outputs)?;
        print!("{}", report_results(&result));
    }

    Ok(())
}
