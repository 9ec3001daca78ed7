//! Test reporting module
//!
//! Every executed test leaves a [`TestRecord`] in the runner's history.
//! Reporters turn records into console output or a JSON summary.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;

/// Log prefix of a passing summary line
pub const PASS_MARK: &str = "\t✓";
/// Log prefix of a failure line
pub const FAIL_MARK: &str = "\tX";
/// Log prefix of the vacuous-test line
pub const EMPTY_MARK: &str = "\t?";

/// Outcome of one executed test
#[derive(Debug, Clone, Serialize)]
pub struct TestRecord {
    /// Test description
    pub description: String,

    /// When the test body was started
    pub started_at: DateTime<Utc>,

    /// Human-readable log lines, in order
    pub log: Vec<String>,

    /// Whether the test passed
    pub passed: bool,

    /// Wall-clock time for the body and all checks
    pub elapsed_ms: f64,

    /// Number of registered expectations
    pub expectations: usize,

    /// Number of expectations that failed
    pub failed_expectations: usize,
}

impl TestRecord {
    pub fn log(&self) -> &[String] {
        &self.log
    }

    /// Whether any log line contains `needle`
    pub fn mentions(&self, needle: &str) -> bool {
        self.log.iter().any(|line| line.contains(needle))
    }
}

/// Test statistics
#[derive(Debug, Default, Clone, Serialize)]
pub struct TestStats {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

/// Aggregate of a set of executed tests
#[derive(Debug, Clone, Serialize)]
pub struct TestReport {
    /// Report name
    pub name: String,

    /// Executed tests, in completion order
    pub records: Vec<TestRecord>,

    /// Sum of the tests' elapsed times
    pub duration_ms: f64,

    /// Summary statistics
    pub stats: TestStats,
}

impl TestReport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: Vec::new(),
            duration_ms: 0.0,
            stats: TestStats::default(),
        }
    }

    pub fn from_records(name: impl Into<String>, records: impl IntoIterator<Item = TestRecord>) -> Self {
        let mut report = Self::new(name);
        for record in records {
            report.add_record(record);
        }
        report
    }

    pub fn add_record(&mut self, record: TestRecord) {
        self.stats.total += 1;
        if record.passed {
            self.stats.passed += 1;
        } else {
            self.stats.failed += 1;
        }
        self.duration_ms += record.elapsed_ms;
        self.records.push(record);
    }

    pub fn is_success(&self) -> bool {
        self.stats.failed == 0
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize test report")
    }
}

/// Render a record's log for the console
pub fn render_log(record: &TestRecord, color: bool) -> String {
    record
        .log
        .iter()
        .map(|line| {
            if !color {
                line.clone()
            } else if line.starts_with(PASS_MARK) {
                line.green().to_string()
            } else if line.starts_with(FAIL_MARK) {
                line.red().to_string()
            } else if line.starts_with(EMPTY_MARK) {
                line.yellow().to_string()
            } else if line.starts_with("Test ") {
                line.bold().to_string()
            } else {
                line.dimmed().to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Test reporter trait
pub trait TestReporter {
    /// Called when a test finishes
    fn on_test_finish(&self, record: &TestRecord);

    /// Called once all tests of a run have finished
    fn on_run_finish(&self, report: &TestReport);
}

/// Console test reporter
pub struct ConsoleReporter {
    color: bool,
}

impl ConsoleReporter {
    pub fn new(color: bool) -> Self {
        Self { color }
    }
}

impl TestReporter for ConsoleReporter {
    fn on_test_finish(&self, record: &TestRecord) {
        println!("{}\n", render_log(record, self.color));
    }

    fn on_run_finish(&self, report: &TestReport) {
        let stats = &report.stats;
        let passed = format!("{} passed", stats.passed);
        let failed = format!("{} failed", stats.failed);
        if self.color {
            println!("{}: {}, {}", report.name.bold(), passed.green(), failed.red());
        } else {
            println!("{}: {}, {}", report.name, passed, failed);
        }
        println!("Total: {} tests in {:.3}ms", stats.total, report.duration_ms);
    }
}

/// JSON test reporter
pub struct JsonReporter;

impl TestReporter for JsonReporter {
    fn on_test_finish(&self, _record: &TestRecord) {
        // Records are emitted with the summary
    }

    fn on_run_finish(&self, report: &TestReport) {
        match report.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => tracing::error!("{:#}", e),
        }
    }
}
