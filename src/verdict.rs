use std::fmt::Write;

use crate::sandbox::{MultiTestResult, ProgramStatus, TestOutcome};

/// A candidate passes iff it compiled and every test result is a pass
///
/// Missing results count as failures, so a run cut short by
/// `stop_on_first_failure` can only pass if nothing was skipped.
pub fn did_it_pass(multi_result: &MultiTestResult) -> bool {
    if multi_result.compilation_result.program_status != ProgramStatus::Success {
        log::debug!("Compilation error");
        return false;
    }

    multi_result
        .test_results
        .iter()
        .all(|result| result.outcome == TestOutcome::Passed)
}

/// Human-readable account of one tester invocation
pub fn report_results(multi_result: &MultiTestResult) -> String {
    let compilation = &multi_result.compilation_result;
    let mut report = String::new();

    let status = if compilation.program_status == ProgramStatus::Success {
        "succeeded"
    } else {
        "failed"
    };
    let _ = writeln!(report, "Compilation {status}");
    if !compilation.sandbox_status.is_ok() {
        let _ = writeln!(report, "Sandbox status: {:?}", compilation.sandbox_status);
    }

    for (i, result) in multi_result.test_results.iter().enumerate() {
        let line = match result.outcome {
            TestOutcome::Passed => "passed",
            TestOutcome::Failed => "failed",
            TestOutcome::NotRun => "did not run",
        };
        let _ = writeln!(report, "Test {i} {line}.");
        if !result.sandbox_status.is_ok() {
            let _ = writeln!(report, "  Sandbox status: {:?}", result.sandbox_status);
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{CompilationResult, SandboxStatus, TestResult};
    use pretty_assertions::assert_eq;

    fn compiled(program_status: ProgramStatus) -> CompilationResult {
        CompilationResult {
            program_status,
            sandbox_status: SandboxStatus::Ok,
            message: String::new(),
        }
    }

    fn outcome(outcome: TestOutcome) -> TestResult {
        TestResult {
            outcome,
            ..TestResult::not_run()
        }
    }

    fn multi(program_status: ProgramStatus, outcomes: &[TestOutcome]) -> MultiTestResult {
        MultiTestResult {
            compilation_result: compiled(program_status),
            test_results: outcomes.iter().copied().map(outcome).collect(),
        }
    }

    #[test]
    fn test_failed_compilation_never_passes() {
        use TestOutcome::*;
        assert!(!did_it_pass(&multi(ProgramStatus::Failure, &[])));
        assert!(!did_it_pass(&multi(ProgramStatus::Failure, &[Passed, Passed])));
        assert!(!did_it_pass(&multi(ProgramStatus::TimedOut, &[Passed])));
    }

    #[test]
    fn test_all_passed_is_required() {
        use TestOutcome::*;
        assert!(did_it_pass(&multi(ProgramStatus::Success, &[Passed, Passed, Passed])));
        assert!(!did_it_pass(&multi(ProgramStatus::Success, &[Passed, Failed, Passed])));
        assert!(!did_it_pass(&multi(ProgramStatus::Success, &[Passed, NotRun])));
    }

    #[test]
    fn test_no_tests_after_compilation_passes() {
        assert!(did_it_pass(&multi(ProgramStatus::Success, &[])));
    }

    #[test]
    fn test_report_lines() {
        use TestOutcome::*;
        let mut result = multi(ProgramStatus::Success, &[Passed, Failed, NotRun]);
        result.test_results[2].sandbox_status = SandboxStatus::Error("lost".to_string());

        assert_eq!(
            report_results(&result),
            "Compilation succeeded\n\
             Test 0 passed.\n\
             Test 1 failed.\n\
             Test 2 did not run.\n  \
             Sandbox status: Error(\"lost\")\n"
        );
        assert_eq!(
            report_results(&multi(ProgramStatus::Failure, &[])),
            "Compilation failed\n"
        );
    }
}
