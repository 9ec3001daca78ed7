//! Asynchronous unit-testing engine with deferred expectations
//!
//! A test function receives an [`Expect`] factory and registers
//! expectations against values; nothing is checked until the function
//! has finished. The [`TestRunner`] then evaluates every expectation in
//! registration order and records the outcome in its history.

pub mod config;
pub mod error;
pub mod expectation;
pub mod test_report;
pub mod test_runner;
pub mod value;

pub use config::RunnerConfig;
pub use error::{CheckFailure, ErrorKind, ExpectError, ExpectMethod, FailureCause, Raised};
pub use expectation::{CheckQueue, Expect, Expectation, PendingCheck};
pub use test_report::{ConsoleReporter, JsonReporter, TestRecord, TestReport, TestReporter, TestStats};
pub use test_runner::{TestFuture, TestHandle, TestRunner};
pub use value::{Callable, ObjectRef, Value};
