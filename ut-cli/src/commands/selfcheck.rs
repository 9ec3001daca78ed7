//! Self-check command implementation
//!
//! Runs a fixed table of cases through the engine. Every case is paired
//! with the outcome it should produce; a case whose outcome differs makes
//! the whole run fail.

use std::future::Future;
use anyhow::Result;
use colored::*;
use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;
use tracing::debug;
use ut_testing::{
    Callable, CheckQueue, ConsoleReporter, ErrorKind, Expect, JsonReporter, Raised,
    RunnerConfig, TestReport, TestReporter, TestRunner, Value,
};

/// Report format of the summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ReportFormat {
    Text,
    Json,
}

/// One entry of the case table
pub struct Case {
    outcome: BoxFuture<'static, bool>,
    should_fail: bool,
}

/// Totals of a finished self-check run
#[derive(Debug, Default)]
pub struct SelfCheckSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub mismatches: Vec<String>,
}

impl SelfCheckSummary {
    pub fn is_ok(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Run the case table; returns whether every case behaved as expected
pub async fn selfcheck_command(config: RunnerConfig, format: ReportFormat) -> Result<bool> {
    let color = config.color;
    if format == ReportFormat::Text {
        println!("ut: Starting unit tests . . .\n");
    }

    let runner = TestRunner::new(config.clone());
    let queue_runner = TestRunner::new(config);
    let cases = build_cases(&runner, &queue_runner);
    let summary = evaluate_cases(cases).await;

    let report = TestReport::from_records(
        "ut self-check",
        runner.history().into_iter().chain(queue_runner.history()),
    );

    match format {
        ReportFormat::Json => JsonReporter.on_run_finish(&report),
        ReportFormat::Text => {
            ConsoleReporter::new(color).on_run_finish(&report);
            print_summary(&summary);
        }
    }

    Ok(summary.is_ok())
}

/// Await every case and compare it with its expected outcome
pub async fn evaluate_cases(cases: Vec<Case>) -> SelfCheckSummary {
    let expected: Vec<bool> = cases.iter().map(|case| case.should_fail).collect();
    let outcomes = join_all(cases.into_iter().map(|case| case.outcome)).await;

    let mut summary = SelfCheckSummary::default();
    for (index, (passed, should_fail)) in outcomes.into_iter().zip(expected).enumerate() {
        let number = index + 1;
        summary.total += 1;
        if passed {
            summary.passed += 1;
        } else {
            summary.failed += 1;
        }
        debug!(case = number, passed, should_fail, "case finished");

        if passed && should_fail {
            summary
                .mismatches
                .push(format!("ut: Case #{} passed when it was expected to fail!", number));
        } else if !passed && !should_fail {
            summary
                .mismatches
                .push(format!("ut: Case #{} failed when it was expected to pass!", number));
        }
    }
    summary
}

fn print_summary(summary: &SelfCheckSummary) {
    println!("ut: {} tests total.", summary.total);
    if summary.passed > 0 {
        println!("ut: {} unit tests passed successfully.", summary.passed);
    }
    if summary.failed > 0 {
        println!("ut: {} unit tests failed.", summary.failed);
    }
    for mismatch in &summary.mismatches {
        println!("{}", mismatch.red());
    }
    if summary.is_ok() {
        println!("{}", "ut: OK".green().bold());
    } else {
        eprintln!("{}", "ut: FAIL".red().bold());
    }
}

fn immediate<F, Fut>(runner: &TestRunner, description: &str, should_fail: bool, test_fn: F) -> Case
where
    F: FnOnce(Expect) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let runner = runner.clone();
    let description = description.to_string();
    Case {
        outcome: async move { runner.test(description, test_fn).await }.boxed(),
        should_fail,
    }
}

fn from_future<Fut>(outcome: Fut, should_fail: bool) -> Case
where
    Fut: Future<Output = bool> + Send + 'static,
{
    Case {
        outcome: outcome.boxed(),
        should_fail,
    }
}

fn foobar() -> Callable {
    Callable::new(|| Ok(Value::from("foobar"))).named("testFunction2")
}

fn raising(kind: &ErrorKind) -> Callable {
    let kind = kind.clone();
    Callable::new(move || Err(Raised::new(&kind, "Test Error"))).named("testFunction")
}

/// A single expectation evaluated outside a runner; `true` if its check
/// fails, which is the outcome the case wants
async fn check_fails(register: impl FnOnce(&Expect)) -> bool {
    let queue = CheckQueue::new();
    register(&Expect::new(queue.clone()));
    let mut failed = false;
    for check in queue.drain() {
        failed |= check.run().await.is_err();
    }
    failed
}

/// The case table, in reporting order
pub fn build_cases(runner: &TestRunner, queue_runner: &TestRunner) -> Vec<Case> {
    let test_error = ErrorKind::new("TestError");
    let test_error1 = ErrorKind::new("TestError1");
    let test_error2 = ErrorKind::new("TestError2");
    let mut cases = Vec::new();

    cases.push(immediate(
        runner,
        "1. a test should fail if no expectations were supplied",
        true,
        |_expect| async { Ok(()) },
    ));

    cases.push(immediate(
        runner,
        "2. to_be should pass when the actual value matches the expected value",
        false,
        |expect| async move {
            expect.that(true).to_be(true);
            let obj = Value::object();
            expect.that(obj.clone()).to_be(obj);
            Ok(())
        },
    ));

    cases.push(immediate(
        runner,
        "3. to_be should fail when the actual value does not match the expected value",
        true,
        |expect| async move {
            expect.that(true).to_be(false);
            expect.that(Value::object()).to_be(Value::object());
            Ok(())
        },
    ));

    cases.push(immediate(
        runner,
        "4. to_not_be should pass when the actual value does not match the expected value",
        false,
        |expect| async move {
            expect.that(true).to_not_be(false);
            expect.that(Value::object()).to_not_be(Value::object());
            Ok(())
        },
    ));

    cases.push(immediate(
        runner,
        "5. to_not_be should fail when the actual value matches the expected value",
        true,
        |expect| async move {
            expect.that(true).to_not_be(true);
            let obj = Value::object();
            expect.that(obj.clone()).to_not_be(obj);
            Ok(())
        },
    ));

    cases.push(immediate(
        runner,
        "6. to_return should pass when the returned value matches the expected value",
        false,
        |expect| async move {
            expect.that(foobar()).to_return("foobar");
            Ok(())
        },
    ));

    cases.push(immediate(
        runner,
        "7. to_return should fail when the returned value does not match the expected value",
        true,
        |expect| async move {
            expect.that(foobar()).to_return("baz");
            Ok(())
        },
    ));

    cases.push(immediate(
        runner,
        "8. to_not_return should pass when the returned value does not match the expected value",
        false,
        |expect| async move {
            expect.that(foobar()).to_not_return("baz");
            Ok(())
        },
    ));

    cases.push(immediate(
        runner,
        "9. to_not_return should fail when the returned value matches the expected value",
        true,
        |expect| async move {
            expect.that(foobar()).to_not_return("foobar");
            Ok(())
        },
    ));

    let kind = test_error.clone();
    cases.push(immediate(
        runner,
        "10. to_throw should pass when the thrown error matches the expected error",
        false,
        move |expect| async move {
            expect.that(raising(&kind)).to_throw(None);
            expect.that(raising(&kind)).to_throw(&kind);
            Ok(())
        },
    ));

    let (kind1, kind2) = (test_error1.clone(), test_error2.clone());
    cases.push(immediate(
        runner,
        "11. to_throw should fail when the thrown error does not match the expected error",
        true,
        move |expect| async move {
            expect.that(foobar()).to_throw(None);
            expect.that(raising(&kind1)).to_throw(&kind2);
            Ok(())
        },
    ));

    let (kind1, kind2) = (test_error1, test_error2);
    cases.push(immediate(
        runner,
        "12. to_not_throw should pass when the thrown error does not match the expected error",
        false,
        move |expect| async move {
            expect.that(foobar()).to_not_throw(None);
            expect.that(raising(&kind1)).to_not_throw(&kind2);
            Ok(())
        },
    ));

    let kind = test_error;
    cases.push(immediate(
        runner,
        "13. to_not_throw should fail when the thrown error matches the expected error",
        true,
        move |expect| async move {
            expect.that(raising(&kind)).to_not_throw(None);
            expect.that(raising(&kind)).to_not_throw(&kind);
            Ok(())
        },
    ));

    let queued_pass = queue_runner.queue_test("14. queue_test should pass when expected", |expect| async move {
        expect.that(true).to_be(true);
        Ok(())
    });
    let queued_fail = queue_runner.queue_test("15. queue_test should fail when expected", |expect| async move {
        expect.that(true).to_be(false);
        Ok(())
    });
    let mut run = queue_runner.run_tests(true).into_iter();
    cases.push(from_future(queued_pass, false));
    cases.push(from_future(queued_fail, true));
    for should_fail in [false, true] {
        match run.next() {
            Some(handle) => cases.push(from_future(handle, should_fail)),
            // A missing handle must surface as a mismatch
            None => cases.push(from_future(futures_util::future::ready(false), false)),
        }
    }

    // A check evaluated on its own counts as passing when it rejects a
    // wrong value, so these two cases report the failure as success
    cases.push(from_future(
        check_fails(|expect| expect.that("TestValue").to_be("Not TestValue")),
        false,
    ));
    cases.push(from_future(
        check_fails(|expect| expect.that("TestValue").to_not_be("TestValue")),
        false,
    ));

    cases
}
