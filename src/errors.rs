/// Failures that abort an operation, as opposed to wrong answers or
/// compilation errors, which are recorded as data in the test results.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// A named lookup (e.g. a demo problem) is absent from the dataset
    NotFound(String),
    /// The tester could not execute the program at all
    SandboxFailure(String),
    /// Malformed candidate batch, dataset record or configuration
    ParseFailure(String),
}

pub use Error::*;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotFound(what) => write!(f, "not found: {what}"),
            SandboxFailure(what) => write!(f, "sandbox failure: {what}"),
            ParseFailure(what) => write!(f, "parse failure: {what}"),
        }
    }
}

impl std::error::Error for Error {}
