use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::de::IoRead;
use serde_json::StreamDeserializer;

use crate::errors::{NotFound, ParseFailure};

const TRAIN_SHARDS: usize = 128;

/// One dataset record: a contest problem with its tests and reference solutions
#[derive(Deserialize, Debug, Clone, Default)]
pub struct Problem {
    pub name: String,
    #[serde(default)]
    pub public_tests: Vec<TestCase>,
    #[serde(default)]
    pub private_tests: Vec<TestCase>,
    #[serde(default)]
    pub generated_tests: Vec<TestCase>,
    #[serde(default)]
    pub solutions: Vec<ReferenceSolution>,
    #[serde(default)]
    pub incorrect_solutions: Vec<ReferenceSolution>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct TestCase {
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub output: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ReferenceSolution {
    #[serde(default)]
    pub language: Language,
    pub solution: Option<String>,
}

/// Solution language as tagged in the dataset. `Python` is Python 2.
#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Language {
    #[default]
    UnknownLanguage,
    Python,
    Cpp,
    Python3,
    Java,
}

/// Sequential reader over a JSON Lines problem file
///
/// Records are decoded one at a time; the file is never loaded as a whole.
/// After the first malformed record the reader yields nothing more.
pub struct DatasetReader<R: Read> {
    source: String,
    records: StreamDeserializer<'static, IoRead<R>, Problem>,
    position: usize,
    failed: bool,
}

impl DatasetReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open dataset {}", path.display()))?;
        Ok(Self::from_reader(
            path.display().to_string(),
            BufReader::new(file),
        ))
    }
}

impl<R: Read> DatasetReader<R> {
    pub fn from_reader(source: impl Into<String>, reader: R) -> Self {
        Self {
            source: source.into(),
            records: serde_json::Deserializer::from_reader(reader).into_iter(),
            position: 0,
            failed: false,
        }
    }
}

impl<R: Read> Iterator for DatasetReader<R> {
    type Item = Result<Problem>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let record = self.records.next()?;
        self.position += 1;

        match record {
            Ok(problem) => Some(Ok(problem)),
            Err(e) => {
                self.failed = true;
                let location = format!("{} record {}", self.source, self.position);
                if e.is_io() {
                    Some(Err(anyhow!(e).context(format!("Failed to read {location}"))))
                } else {
                    Some(Err(ParseFailure(format!("{location}: {e}")).into()))
                }
            }
        }
    }
}

/// Streams the problems of several dataset files, one file after the other
pub fn problems(paths: &[PathBuf]) -> impl Iterator<Item = Result<Problem>> + '_ {
    paths.iter().flat_map(|path| {
        let records: Box<dyn Iterator<Item = Result<Problem>>> = match DatasetReader::open(path) {
            Ok(reader) => Box::new(reader),
            Err(e) => Box::new(std::iter::once(Err(e))),
        };
        records
    })
}

/// Standard shard layout below a dataset directory: test, valid, then train
pub fn shard_paths(data_path: &Path) -> Vec<PathBuf> {
    let mut paths = vec![
        data_path.join("code_contests_test.jsonl"),
        data_path.join("code_contests_valid.jsonl"),
    ];
    paths.extend((0..TRAIN_SHARDS).map(|i| {
        data_path.join(format!(
            "code_contests_train.jsonl-{i:05}-of-{TRAIN_SHARDS:05}"
        ))
    }));
    paths
}

/// Scans the stream until a problem with the given name shows up
pub fn find_problem(
    mut problems: impl Iterator<Item = Result<Problem>>,
    name: &str,
) -> Result<Problem> {
    problems
        .find_map(|problem| match problem {
            Ok(problem) if problem.name == name => Some(Ok(problem)),
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        })
        .unwrap_or_else(|| {
            Err(NotFound(format!(
                "problem {name:?} is not in the dataset. Did you pass the right split?"
            ))
            .into())
        })
}

fn all_tests(problem: &Problem) -> impl Iterator<Item = &TestCase> {
    problem
        .public_tests
        .iter()
        .chain(&problem.private_tests)
        .chain(&problem.generated_tests)
}

/// Test inputs in public, private, generated order, truncated to `max_size`
///
/// `None` means no limit. Truncation never pads.
pub fn get_inputs(problem: &Problem, max_size: Option<usize>) -> Vec<&str> {
    all_tests(problem)
        .map(|test| test.input.as_str())
        .take(max_size.unwrap_or(usize::MAX))
        .collect()
}

/// Expected outputs, aligned position by position with [`get_inputs`]
pub fn get_outputs(problem: &Problem, max_size: Option<usize>) -> Vec<&str> {
    all_tests(problem)
        .map(|test| test.output.as_str())
        .take(max_size.unwrap_or(usize::MAX))
        .collect()
}

/// Reference solutions written in `language`, skipping entries without text
pub fn get_lang_solutions(
    problem: &Problem,
    max_size: Option<usize>,
    language: Language,
) -> Vec<&str> {
    problem
        .solutions
        .iter()
        .filter(|s| s.language == language)
        .filter_map(|s| s.solution.as_deref())
        .take(max_size.unwrap_or(usize::MAX))
        .collect()
}
