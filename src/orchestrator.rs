use anyhow::{Result, bail};

use crate::candidates::{CandidateIndex, CandidateSolution};
use crate::dataset::{Language, Problem, get_inputs, get_lang_solutions, get_outputs};
use crate::errors::SandboxFailure;
use crate::report::{ProblemTally, ResultEntry, ScanState};
use crate::sandbox::{TestOptions, Tester};
use crate::verdict::did_it_pass;

/// Reference solution languages, in evaluation order
const REFERENCE_LANGUAGES: [Language; 2] = [Language::Python3, Language::Python];

/// Outcome of running one candidate through the strategy list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub passed: bool,
    /// Number of strategies invoked
    pub attempts: usize,
    /// Name of the strategy that accepted the candidate
    pub passing_strategy: Option<String>,
}

/// Drives candidates through an ordered list of testers
///
/// Strategies are tried in order until one of them accepts the candidate; a
/// later strategy is only consulted to rescue a failure, never to overrule a
/// pass. Calls are strictly sequential.
pub struct Orchestrator {
    strategies: Vec<Box<dyn Tester>>,
    options: TestOptions,
}

impl Orchestrator {
    pub fn new(strategies: Vec<Box<dyn Tester>>, options: TestOptions) -> Result<Self> {
        if strategies.is_empty() {
            bail!("The orchestrator needs at least one tester");
        }
        Ok(Self {
            strategies,
            options,
        })
    }

    pub fn options(&self) -> TestOptions {
        self.options
    }

    /// The strategy tried first
    pub fn primary(&self) -> &dyn Tester {
        self.strategies[0].as_ref()
    }

    /// Judges one program, falling back through the strategies
    ///
    /// A tester error aborts the evaluation as `SandboxFailure`; it is neither
    /// retried nor counted as a failed candidate.
    pub fn evaluate(&self, source: &str, inputs: &[&str], outputs: &[&str]) -> Result<Evaluation> {
        for (attempt, strategy) in self.strategies.iter().enumerate() {
            let result = strategy
                .test(source, inputs, self.options, outputs)
                .map_err(|e| SandboxFailure(format!("{} tester: {e:#}", strategy.name())))?;

            let passed = did_it_pass(&result);
            log::debug!(
                "Strategy {} {} with {} of {} test results",
                strategy.name(),
                if passed { "passed" } else { "failed" },
                result.test_results.len(),
                inputs.len()
            );

            if passed {
                return Ok(Evaluation {
                    passed: true,
                    attempts: attempt + 1,
                    passing_strategy: Some(strategy.name().to_string()),
                });
            }
        }

        Ok(Evaluation {
            passed: false,
            attempts: self.strategies.len(),
            passing_strategy: None,
        })
    }

    /// Judges `sources` against all tests of `problem`, honoring the scan's cap
    ///
    /// Returns the tally and the verdicts of the sources that were evaluated,
    /// which are a prefix of `sources`.
    fn evaluate_problem<'a>(
        &self,
        problem: &Problem,
        sources: impl IntoIterator<Item = &'a str>,
        state: &ScanState,
    ) -> Result<(ProblemTally, Vec<bool>)> {
        let inputs = get_inputs(problem, None);
        let outputs = get_outputs(problem, None);
        let mut tally = ProblemTally::start(&problem.name);
        let mut verdicts = Vec::new();

        for source in sources {
            if state.cap_reached(&tally) {
                log::info!(
                    "Reached {} evaluations for {}, moving on",
                    tally.evaluated(),
                    problem.name
                );
                break;
            }

            let evaluation = self.evaluate(source, &inputs, &outputs)?;
            tally.record(evaluation.passed);
            verdicts.push(evaluation.passed);
        }

        let tally = tally.finish();
        log::info!(
            "{}: {} in {:?}",
            problem.name,
            tally.summary_line(),
            tally.duration
        );
        Ok((tally, verdicts))
    }

    /// Evaluates every candidate whose id matches a problem of the stream
    ///
    /// Problems without candidates are skipped, and candidates without a
    /// problem are never evaluated. Verdicts are stored on the candidates and
    /// appended to `state.results` in stream order, then batch order.
    pub fn solve_all(
        &self,
        problems: impl IntoIterator<Item = Result<Problem>>,
        index: &CandidateIndex,
        candidates: &mut [CandidateSolution],
        state: &mut ScanState,
    ) -> Result<()> {
        for problem in problems {
            let problem = problem?;
            let matched = index.matching(&problem.name);
            if matched.is_empty() {
                continue;
            }
            log::info!(
                "Found {} generation(s) for {}",
                matched.len(),
                problem.name
            );

            let sources = matched.iter().map(|&pos| candidates[pos].generated.as_str());
            let (tally, verdicts) = self.evaluate_problem(&problem, sources, state)?;

            for (&pos, passed) in matched.iter().zip(verdicts) {
                let candidate = &mut candidates[pos];
                candidate.evaluated = true;
                candidate.passed = passed;
                log::info!(
                    "Candidate for {} {}",
                    candidate.id,
                    if passed { "passed" } else { "failed" }
                );
                state.results.push(ResultEntry::from_candidate(candidate));
            }
            state.tallies.push(tally);
        }

        Ok(())
    }

    /// Evaluates the Python reference solutions stored with each problem
    ///
    /// Python 3 solutions come first, then Python 2 ones; each language list
    /// is truncated to `max_solutions`. An empty `selected` list means every
    /// problem.
    pub fn solve_reference(
        &self,
        problems: impl IntoIterator<Item = Result<Problem>>,
        selected: &[String],
        max_solutions: Option<usize>,
        state: &mut ScanState,
    ) -> Result<()> {
        for problem in problems {
            let problem = problem?;
            if !selected.is_empty() && !selected.iter().any(|name| *name == problem.name) {
                continue;
            }
            log::info!("Evaluating reference solutions of {}", problem.name);

            let solutions: Vec<&str> = REFERENCE_LANGUAGES
                .iter()
                .flat_map(|&language| get_lang_solutions(&problem, max_solutions, language))
                .collect();

            let (tally, _) = self.evaluate_problem(&problem, solutions, state)?;
            state.tallies.push(tally);
        }

        Ok(())
    }
}
