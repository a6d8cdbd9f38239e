use anyhow::Result;

use super::{MultiTestResult, TestOptions};

/// Trait for the different ways of executing a candidate program
///
/// A tester compiles `source` once and runs it against every input, comparing
/// the program output with the expected output at the same position. Wrong
/// answers, crashes, timeouts and compilation errors are reported inside the
/// returned `MultiTestResult`; `Err` is reserved for failures of the tester
/// itself, such as an interpreter that cannot be spawned.
pub trait Tester: Send + Sync {
    /// Short name used in logs, e.g. `python3`
    fn name(&self) -> &str;

    /// Runs `source` against `inputs` and checks it against `outputs`
    ///
    /// This call blocks until every scheduled test has finished.
    fn test(
        &self,
        source: &str,
        inputs: &[&str],
        options: TestOptions,
        outputs: &[&str],
    ) -> Result<MultiTestResult>;
}
