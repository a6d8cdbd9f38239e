use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use crate::dataset::shard_paths;
use crate::errors::ParseFailure;
use crate::sandbox::TestOptions;

#[derive(Parser, Debug)]
#[command(name = "cceval", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long = "config", short = 'c', global = true)]
    pub config_path: Option<PathBuf>,

    /// Wall-clock limit per test, in seconds
    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,

    /// Number of tests of one candidate run concurrently
    #[arg(long, short = 't', global = true)]
    pub threads: Option<usize>,

    /// Whether to stop testing a candidate after its first failing test
    #[arg(long, global = true)]
    pub stop_on_first_failure: Option<bool>,

    /// Directory for per-invocation scratch files
    #[arg(long, global = true)]
    pub work_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub mode: Mode,
}

#[derive(Subcommand, Debug)]
pub enum Mode {
    /// Evaluate a batch of generated solutions and write their verdicts
    SolveAll {
        /// Candidate batch (JSON)
        #[arg(long, short = 'i')]
        input: PathBuf,

        /// Where to write the result batch (JSON)
        #[arg(long, short = 'o')]
        output: PathBuf,

        #[command(flatten)]
        dataset: DatasetArgs,

        /// Evaluate at most this many candidates per problem
        #[arg(long)]
        max_per_problem: Option<usize>,
    },

    /// Evaluate the dataset's own Python reference solutions
    Reference {
        #[command(flatten)]
        dataset: DatasetArgs,

        /// Only evaluate these problems (all problems if omitted)
        #[arg(long = "problem")]
        problems: Vec<String>,

        /// Evaluate at most this many solutions per problem
        #[arg(long, default_value_t = 50)]
        max_per_problem: usize,

        /// Take at most this many solutions of each language
        #[arg(long)]
        max_solutions: Option<usize>,
    },

    /// Run the bundled sample programs against one problem
    Demo {
        #[command(flatten)]
        dataset: DatasetArgs,

        /// Name of the problem to test against
        #[arg(long, default_value = "1549_A. Gregor and Cryptography")]
        problem: String,

        /// Directory holding invalid.py, bad.py and good.py
        #[arg(long, default_value = "data/fixtures")]
        fixtures: PathBuf,

        /// Use at most this many test cases
        #[arg(long, default_value_t = 10)]
        max_tests: usize,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct DatasetArgs {
    /// Directory with the standard test/valid/train shards
    #[arg(long)]
    pub data_path: Option<PathBuf>,

    /// Explicit dataset file; may be repeated and overrides --data-path
    #[arg(long = "dataset")]
    pub datasets: Vec<PathBuf>,
}

impl DatasetArgs {
    /// Dataset files to read, in order
    ///
    /// Shards missing below `--data-path` are skipped with a warning.
    pub fn files(&self) -> Result<Vec<PathBuf>> {
        if !self.datasets.is_empty() {
            return Ok(self.datasets.clone());
        }

        let data_path = self
            .data_path
            .as_ref()
            .ok_or_else(|| anyhow!("Either --dataset or --data-path is required"))?;

        let files: Vec<PathBuf> = shard_paths(data_path)
            .into_iter()
            .filter(|path| {
                let exists = path.exists();
                if !exists {
                    log::warn!("Dataset shard {} not found, skipping", path.display());
                }
                exists
            })
            .collect();

        if files.is_empty() {
            bail!("No dataset shards found below {}", data_path.display());
        }
        Ok(files)
    }
}

impl CliArgs {
    /// Load the configuration file, if any, and apply command line overrides
    pub fn to_config(&self) -> Result<EvalConfig> {
        let mut config = match &self.config_path {
            Some(path) => EvalConfig::load(path)?,
            None => EvalConfig::default(),
        };

        if let Some(secs) = self.timeout_secs {
            config.options.max_execution_ms = MilliSecond(secs.saturating_mul(1000));
        }
        if let Some(threads) = self.threads {
            config.options.num_threads = threads;
        }
        if let Some(stop) = self.stop_on_first_failure {
            config.options.stop_on_first_failure = stop;
        }
        if let Some(work_dir) = &self.work_dir {
            config.work_dir = Some(work_dir.clone());
        }

        config.validate()?;
        self.mode.validate()?;
        Ok(config)
    }
}

impl Mode {
    pub fn validate(&self) -> Result<()> {
        let max_per_problem = match self {
            Mode::SolveAll {
                max_per_problem, ..
            } => *max_per_problem,
            Mode::Reference {
                max_per_problem, ..
            } => Some(*max_per_problem),
            Mode::Demo { .. } => None,
        };
        if max_per_problem == Some(0) {
            bail!("--max-per-problem must be at least 1, 0 would evaluate nothing");
        }
        Ok(())
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct EvalConfig {
    /// Testers in fallback order
    pub testers: Vec<TesterConfig>,
    pub options: OptionsConfig,
    pub work_dir: Option<PathBuf>,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            testers: vec![
                TesterConfig::interpreter("python3"),
                TesterConfig::interpreter("python2"),
            ],
            options: OptionsConfig::default(),
            work_dir: None,
        }
    }
}

impl EvalConfig {
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open config {}", path.display()))?;
        let reader = std::io::BufReader::new(file);
        serde_json::from_reader(reader)
            .map_err(|e| ParseFailure(format!("config {}: {e}", path.display())).into())
    }

    pub fn validate(&self) -> Result<()> {
        if self.testers.is_empty() {
            bail!("At least one tester must be configured");
        }
        if self.options.num_threads == 0 {
            bail!("The number of test threads must not be 0");
        }
        if self.options.max_execution_ms.0 == 0 {
            bail!("The execution time limit must not be 0");
        }
        Ok(())
    }

    /// Work directory from the config, or the user's cache directory
    pub fn resolve_work_dir(&self) -> Result<PathBuf> {
        use directories::ProjectDirs;

        if let Some(work_dir) = &self.work_dir {
            return Ok(work_dir.clone());
        }

        let proj_dirs = ProjectDirs::from("", "", "cceval")
            .ok_or_else(|| anyhow!("Unable to find user directory"))?;
        Ok(proj_dirs.cache_dir().join("runs"))
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TesterConfig {
    pub name: String,
    pub interpreter: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub library_paths: Vec<PathBuf>,
}

impl TesterConfig {
    fn interpreter(name: &str) -> Self {
        Self {
            name: name.to_string(),
            interpreter: PathBuf::from(name),
            args: Vec::new(),
            library_paths: Vec::new(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct OptionsConfig {
    pub max_execution_ms: MilliSecond,
    pub num_threads: usize,
    pub stop_on_first_failure: bool,
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self {
            max_execution_ms: MilliSecond(5000),
            num_threads: 1,
            stop_on_first_failure: true,
        }
    }
}

impl From<OptionsConfig> for TestOptions {
    fn from(options: OptionsConfig) -> Self {
        Self {
            max_execution_duration: options.max_execution_ms.into(),
            num_threads: options.num_threads,
            stop_on_first_failure: options.stop_on_first_failure,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MilliSecond(pub u64);

impl From<MilliSecond> for Duration {
    fn from(value: MilliSecond) -> Self {
        Duration::from_millis(value.0)
    }
}
