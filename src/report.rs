use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::candidates::CandidateSolution;

/// Verdict of one evaluated candidate, as written to the result batch
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ResultEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u64>,
    pub generated: String,
    pub passed: bool,
}

impl ResultEntry {
    pub fn from_candidate(candidate: &CandidateSolution) -> Self {
        Self {
            id: candidate.id.clone(),
            index: candidate.index(),
            generated: candidate.generated.clone(),
            passed: candidate.passed,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct ResultBatch {
    pub results: Vec<ResultEntry>,
}

/// Writes the whole batch at once; nothing is persisted before this call
pub fn write_results(path: impl AsRef<Path>, batch: &ResultBatch) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)
        .with_context(|| format!("Failed to create output file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, batch)
        .with_context(|| format!("Failed to write results to {}", path.display()))?;
    writer.flush()?;
    Ok(())
}

/// Pass/fail counts of one problem
#[derive(Debug, Clone)]
pub struct ProblemTally {
    pub name: String,
    pub num_passed: usize,
    pub num_failed: usize,
    pub duration: Duration,
    started: Instant,
}

impl ProblemTally {
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            num_passed: 0,
            num_failed: 0,
            duration: Duration::ZERO,
            started: Instant::now(),
        }
    }

    pub fn record(&mut self, passed: bool) {
        if passed {
            self.num_passed += 1;
        } else {
            self.num_failed += 1;
        }
    }

    pub fn evaluated(&self) -> usize {
        self.num_passed + self.num_failed
    }

    pub fn finish(mut self) -> Self {
        self.duration = self.started.elapsed();
        self
    }

    pub fn summary_line(&self) -> String {
        format!(
            "num passed: {}, num failed: {}",
            self.num_passed, self.num_failed
        )
    }
}

/// Everything a dataset scan accumulates, threaded through the scan explicitly
#[derive(Debug, Default)]
pub struct ScanState {
    pub results: Vec<ResultEntry>,
    pub tallies: Vec<ProblemTally>,
    /// Stop evaluating a problem once this many candidates were judged
    pub max_per_problem: Option<usize>,
}

impl ScanState {
    pub fn new(max_per_problem: Option<usize>) -> Self {
        Self {
            max_per_problem,
            ..Self::default()
        }
    }

    pub fn cap_reached(&self, tally: &ProblemTally) -> bool {
        self.max_per_problem
            .is_some_and(|cap| tally.evaluated() >= cap)
    }

    pub fn num_passed(&self) -> usize {
        self.tallies.iter().map(|t| t.num_passed).sum()
    }

    pub fn num_failed(&self) -> usize {
        self.tallies.iter().map(|t| t.num_failed).sum()
    }

    /// One `passed,failed` line per problem, in scan order
    pub fn tally_lines(&self) -> Vec<String> {
        self.tallies
            .iter()
            .map(|t| format!("{},{}", t.num_passed, t.num_failed))
            .collect()
    }

    pub fn into_batch(self) -> ResultBatch {
        ResultBatch {
            results: self.results,
        }
    }
}
