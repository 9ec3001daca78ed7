//! Test runner
//!
//! Runs a test function with a fresh check queue, then evaluates every
//! registered check in order. Each execution moves through
//! `RunningBody` and `CheckingExpectations` to `Passed` or `Failed`.
//! Failures never escape [`TestRunner::test`]; they become a `false`
//! result and a log entry.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::task::{Context, Poll};
use std::time::Instant;
use chrono::{DateTime, SecondsFormat, Utc};
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use crate::config::RunnerConfig;
use crate::error::CheckFailure;
use crate::expectation::{lock, CheckQueue, Expect, PendingCheck};
use crate::test_report::{ConsoleReporter, TestRecord, TestReporter, EMPTY_MARK, FAIL_MARK, PASS_MARK};

/// Future returned by a boxed test function
pub type TestFuture = BoxFuture<'static, anyhow::Result<()>>;

type SharedTestFn = Arc<dyn Fn(Expect) -> TestFuture + Send + Sync>;

/// Phase of a single test execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TestPhase {
    RunningBody,
    CheckingExpectations,
    Passed,
    Failed,
}

/// Eventual result of a queued test. Resolves to `true` iff the test
/// passed; resolves to `false` if the test can no longer run.
#[derive(Clone)]
pub struct TestHandle(Shared<BoxFuture<'static, bool>>);

impl TestHandle {
    fn pending() -> (oneshot::Sender<bool>, Self) {
        let (tx, rx) = oneshot::channel();
        let outcome = rx.map(|passed| passed.unwrap_or(false)).boxed().shared();
        (tx, Self(outcome))
    }

    fn failed() -> Self {
        Self(futures_util::future::ready(false).boxed().shared())
    }
}

impl Future for TestHandle {
    type Output = bool;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<bool> {
        self.0.poll_unpin(cx)
    }
}

impl std::fmt::Debug for TestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("TestHandle").field(&self.0.peek()).finish()
    }
}

/// A test registered for a later batch run
struct QueuedTest {
    description: String,
    test_fn: SharedTestFn,
    /// Resolves the handle returned by `queue_test`; taken by the first run
    notify: Option<oneshot::Sender<bool>>,
}

struct RunnerState {
    emit: AtomicBool,
    color: AtomicBool,
    history: Mutex<Vec<TestRecord>>,
    queue: Mutex<Vec<QueuedTest>>,
}

/// Test runner; clones share history and queue
#[derive(Clone)]
pub struct TestRunner {
    state: Arc<RunnerState>,
}

impl Default for TestRunner {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}

impl TestRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            state: Arc::new(RunnerState {
                emit: AtomicBool::new(config.emit),
                color: AtomicBool::new(config.color),
                history: Mutex::new(Vec::new()),
                queue: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Whether test logs are printed as tests complete
    pub fn emit(&self) -> bool {
        self.state.emit.load(Ordering::Relaxed)
    }

    pub fn set_emit(&self, emit: bool) {
        self.state.emit.store(emit, Ordering::Relaxed);
    }

    pub fn set_color(&self, color: bool) {
        self.state.color.store(color, Ordering::Relaxed);
    }

    /// Records of every executed test, in completion order
    pub fn history(&self) -> Vec<TestRecord> {
        lock(&self.state.history).clone()
    }

    /// Number of tests waiting for `run_tests`
    pub fn queued(&self) -> usize {
        lock(&self.state.queue).len()
    }

    /// Run a test immediately.
    ///
    /// The test function receives an [`Expect`] factory and may suspend.
    /// Returns `true` iff the function completed, registered at least one
    /// expectation, and every expectation passed.
    pub async fn test<F, Fut>(&self, description: impl Into<String>, test_fn: F) -> bool
    where
        F: FnOnce(Expect) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        install_panic_hook();
        let mut execution = TestExecution::start(description.into());
        let queue = CheckQueue::new();
        let expect = Expect::new(queue.clone());

        let body = AssertUnwindSafe(async move { test_fn(expect).await })
            .catch_unwind()
            .await;

        match body {
            Err(panic) => {
                let detail = take_panic_detail();
                execution.fail_setup(&format!("panicked: {}", panic_message(&*panic)), detail.as_deref())
            }
            Ok(Err(err)) => {
                let detail = format!("{:?}", err);
                execution.fail_setup(&format!("{:#}", err), Some(detail.as_str()))
            }
            Ok(Ok(())) if queue.is_empty() => execution.fail_vacuous(),
            Ok(Ok(())) => execution.evaluate(queue.drain()).await,
        }

        let record = execution.finish();
        let passed = record.passed;
        self.record(record);
        passed
    }

    /// Register a test for a later [`run_tests`](Self::run_tests) call.
    ///
    /// The returned handle resolves when the test is first run, not when
    /// it is queued.
    pub fn queue_test<F, Fut>(&self, description: impl Into<String>, test_fn: F) -> TestHandle
    where
        F: Fn(Expect) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let description = description.into();
        debug!(%description, "test queued");
        let (notify, handle) = TestHandle::pending();
        let test_fn: SharedTestFn = Arc::new(move |expect: Expect| -> TestFuture { test_fn(expect).boxed() });
        lock(&self.state.queue).push(QueuedTest {
            description,
            test_fn,
            notify: Some(notify),
        });
        handle
    }

    /// Start every queued test without waiting for earlier ones to finish.
    ///
    /// Returns one handle per queued test. With `dequeue` the queue is
    /// emptied; running tests and their handles are unaffected. Outside a
    /// Tokio runtime no test can start, and every handle resolves to
    /// `false`.
    pub fn run_tests(&self, dequeue: bool) -> Vec<TestHandle> {
        let mut queue = lock(&self.state.queue);
        debug!(count = queue.len(), dequeue, "running queued tests");

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => {
                warn!(count = queue.len(), error = %err, "no async runtime, queued tests not started");
                let handles = queue
                    .iter_mut()
                    .map(|queued| {
                        if let Some(notify) = queued.notify.take() {
                            let _ = notify.send(false);
                        }
                        TestHandle::failed()
                    })
                    .collect();
                if dequeue {
                    queue.clear();
                }
                return handles;
            }
        };

        let handles = queue
            .iter_mut()
            .map(|queued| {
                let (notify, handle) = TestHandle::pending();
                let listeners: Vec<_> = std::iter::once(notify).chain(queued.notify.take()).collect();
                let runner = self.clone();
                let description = queued.description.clone();
                let test_fn = Arc::clone(&queued.test_fn);

                runtime.spawn(async move {
                    let passed = runner.test(description, move |expect| test_fn(expect)).await;
                    for listener in listeners {
                        // The handle may already be dropped
                        let _ = listener.send(passed);
                    }
                });
                handle
            })
            .collect();

        if dequeue {
            queue.clear();
        }
        handles
    }

    fn record(&self, record: TestRecord) {
        info!(
            description = %record.description,
            passed = record.passed,
            elapsed_ms = record.elapsed_ms,
            "test finished"
        );
        if self.emit() {
            ConsoleReporter::new(self.state.color.load(Ordering::Relaxed)).on_test_finish(&record);
        }
        lock(&self.state.history).push(record);
    }
}

/// Mutable state of one test while it runs
struct TestExecution {
    description: String,
    started_at: DateTime<Utc>,
    start: Instant,
    phase: TestPhase,
    /// Frozen when the final log line is written
    elapsed_ms: f64,
    log: Vec<String>,
    expectations: usize,
    failed_expectations: usize,
}

impl TestExecution {
    fn start(description: String) -> Self {
        let started_at = Utc::now();
        debug!(%description, "test started");
        Self {
            log: vec![
                format!("Test \"{}\":", description),
                format!(
                    "\tƒ Test started {}",
                    started_at.to_rfc3339_opts(SecondsFormat::Millis, true)
                ),
            ],
            description,
            started_at,
            start: Instant::now(),
            phase: TestPhase::RunningBody,
            elapsed_ms: 0.0,
            expectations: 0,
            failed_expectations: 0,
        }
    }

    fn transition(&mut self, next: TestPhase) {
        debug!(description = %self.description, from = ?self.phase, to = ?next, "test phase");
        self.phase = next;
    }

    fn stop_clock(&mut self) -> f64 {
        self.elapsed_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        self.elapsed_ms
    }

    /// The body raised or panicked; checks are skipped
    fn fail_setup(&mut self, message: &str, detail: Option<&str>) {
        warn!(description = %self.description, error = %message, "test body failed");
        let elapsed = self.stop_clock();
        let mut entry = format!("{} Test FAILED in {:.3}ms: {}", FAIL_MARK, elapsed, message);
        if let Some(detail) = detail.map(indent_detail).filter(|d| !d.is_empty()) {
            entry.push('\n');
            entry.push_str(&detail);
        }
        self.log.push(entry);
        self.transition(TestPhase::Failed);
    }

    fn fail_vacuous(&mut self) {
        self.stop_clock();
        self.log.push(format!("{} Test FAILED: no expectations defined", EMPTY_MARK));
        self.transition(TestPhase::Failed);
    }

    /// Run every check in registration order; a failure never stops the loop
    async fn evaluate(&mut self, checks: Vec<PendingCheck>) {
        self.transition(TestPhase::CheckingExpectations);
        for (index, check) in checks.into_iter().enumerate() {
            self.expectations += 1;
            let method = check.method();
            let outcome = AssertUnwindSafe(check.run())
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    take_panic_detail();
                    Err(CheckFailure::Panicked(panic_message(&*panic)))
                });

            if let Err(failure) = outcome {
                debug!(description = %self.description, expectation = index + 1, %method, "expectation failed");
                self.failed_expectations += 1;
                self.log.push(format!("{} Expectation #{} FAIL: {}", FAIL_MARK, index + 1, failure));
            }
        }

        let elapsed = self.stop_clock();
        if self.failed_expectations > 0 {
            self.log.push(format!("{} Test FAILED in {:.3}ms", FAIL_MARK, elapsed));
            self.transition(TestPhase::Failed);
        } else {
            self.log.push(format!("{} Test PASSED in {:.3}ms", PASS_MARK, elapsed));
            self.transition(TestPhase::Passed);
        }
    }

    fn finish(self) -> TestRecord {
        TestRecord {
            elapsed_ms: self.elapsed_ms,
            passed: self.phase == TestPhase::Passed,
            description: self.description,
            started_at: self.started_at,
            log: self.log,
            expectations: self.expectations,
            failed_expectations: self.failed_expectations,
        }
    }
}

/// Error chain and backtrace, one indented line each; the first line of
/// `detail` repeats the message and is dropped
fn indent_detail(detail: &str) -> String {
    detail
        .lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .map(|line| format!("\t\t{}", line.replace("    ", "  ")))
        .collect::<Vec<_>>()
        .join("\n")
}

thread_local! {
    static LAST_PANIC: RefCell<Option<String>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Chain a hook in front of the current one that keeps the location and
/// backtrace of the latest panic on this thread. A caught panic unwinds on
/// the thread that polled the body, so the slot belongs to that test.
fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let location = info
                .location()
                .map_or_else(|| "<unknown>".to_string(), ToString::to_string);
            let detail = format!("panic\nat {}\n{}", location, Backtrace::force_capture());
            LAST_PANIC.with(|slot| *slot.borrow_mut() = Some(detail));
            previous(info);
        }));
    });
}

/// Location and backtrace of the panic last caught on this thread
fn take_panic_detail() -> Option<String> {
    LAST_PANIC.with(|slot| slot.borrow_mut().take())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
