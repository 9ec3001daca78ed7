//! Deferred expectations
//!
//! An [`Expectation`] wraps one actual value. Every assertion method on it
//! registers a [`PendingCheck`] in the test's [`CheckQueue`] instead of
//! evaluating anything; the runner evaluates the queue once the test body
//! has finished.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tracing::trace;
use crate::error::{CheckFailure, ErrorKind, ExpectError, ExpectMethod};
use crate::value::{CallResult, Value};

/// Outcome of evaluating one check
pub type CheckResult = Result<(), CheckFailure>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A registered, not yet evaluated check
pub struct PendingCheck {
    method: ExpectMethod,
    check: BoxFuture<'static, CheckResult>,
}

impl PendingCheck {
    pub fn method(&self) -> ExpectMethod {
        self.method
    }

    /// Evaluate the check; consumes it
    pub async fn run(self) -> CheckResult {
        self.check.await
    }
}

impl fmt::Debug for PendingCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCheck")
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

/// Ordered checks registered by one test
#[derive(Debug, Clone, Default)]
pub struct CheckQueue(Arc<Mutex<Vec<PendingCheck>>>);

impl CheckQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, check: PendingCheck) {
        lock(&self.0).push(check);
    }

    pub fn len(&self) -> usize {
        lock(&self.0).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.0).is_empty()
    }

    /// Take every check out of the queue, in registration order
    pub fn drain(&self) -> Vec<PendingCheck> {
        std::mem::take(&mut *lock(&self.0))
    }
}

/// Factory handed to a test function; creates expectations bound to the
/// test's check queue
#[derive(Debug, Clone)]
pub struct Expect {
    queue: CheckQueue,
}

impl Expect {
    pub fn new(queue: CheckQueue) -> Self {
        Self { queue }
    }

    /// Start an expectation about `actual`
    pub fn that(&self, actual: impl Into<Value>) -> Expectation {
        Expectation {
            actual: Arc::new(Mutex::new(actual.into())),
            queue: self.queue.clone(),
        }
    }
}

/// Assertions about a single actual value.
///
/// Checks registered on the same expectation share the actual value:
/// `to_return` and `to_not_return` replace it with the call's result, which
/// later checks on the same expectation observe.
#[derive(Debug)]
pub struct Expectation {
    actual: Arc<Mutex<Value>>,
    queue: CheckQueue,
}

impl Expectation {
    /// Current actual value
    pub fn actual(&self) -> Value {
        lock(&self.actual).clone()
    }

    /// Passes iff the actual value is identical to `expected`
    pub fn to_be(&self, expected: impl Into<Value>) {
        let check = check_identity(ExpectMethod::ToBe, expected.into(), Arc::clone(&self.actual));
        self.enqueue(ExpectMethod::ToBe, check);
    }

    /// Passes iff the actual value is not identical to `expected`
    pub fn to_not_be(&self, expected: impl Into<Value>) {
        let check = check_identity(ExpectMethod::ToNotBe, expected.into(), Arc::clone(&self.actual));
        self.enqueue(ExpectMethod::ToNotBe, check);
    }

    /// Calls the actual value and passes iff the result is identical to
    /// `expected`
    pub fn to_return(&self, expected: impl Into<Value>) {
        let check = check_return(ExpectMethod::ToReturn, expected.into(), Arc::clone(&self.actual));
        self.enqueue(ExpectMethod::ToReturn, check);
    }

    /// Calls the actual value and passes iff the result is not identical to
    /// `expected`
    pub fn to_not_return(&self, expected: impl Into<Value>) {
        let check = check_return(ExpectMethod::ToNotReturn, expected.into(), Arc::clone(&self.actual));
        self.enqueue(ExpectMethod::ToNotReturn, check);
    }

    /// Calls the actual value and passes iff it raises; with a kind, the
    /// raised error must be an instance of it
    pub fn to_throw<'a>(&self, kind: impl Into<Option<&'a ErrorKind>>) {
        let check = check_throws(kind.into().cloned(), Arc::clone(&self.actual));
        self.enqueue(ExpectMethod::ToThrow, check);
    }

    /// Calls the actual value and fails if it raises; with a kind, only a
    /// raised instance of that kind fails the check
    pub fn to_not_throw<'a>(&self, kind: impl Into<Option<&'a ErrorKind>>) {
        let check = check_not_throws(kind.into().cloned(), Arc::clone(&self.actual));
        self.enqueue(ExpectMethod::ToNotThrow, check);
    }

    fn enqueue<F>(&self, method: ExpectMethod, check: F)
    where
        F: Future<Output = CheckResult> + Send + 'static,
    {
        trace!(%method, "expectation registered");
        self.queue.push(PendingCheck {
            method,
            check: check.boxed(),
        });
    }
}

async fn check_identity(method: ExpectMethod, expected: Value, actual: Arc<Mutex<Value>>) -> CheckResult {
    let actual = lock(&actual).clone();
    let identical = expected.is(&actual);
    match method {
        ExpectMethod::ToBe if !identical => Err(ExpectError::mismatch(
            method,
            format!(
                "Expected value \"{}\" but received value \"{}\" instead.",
                expected, actual
            ),
        )
        .into()),
        ExpectMethod::ToNotBe if identical => Err(ExpectError::mismatch(
            method,
            format!("Expected value to not be \"{}\".", expected),
        )
        .into()),
        _ => Ok(()),
    }
}

async fn check_return(method: ExpectMethod, expected: Value, actual: Arc<Mutex<Value>>) -> CheckResult {
    let returned = invoke(method, &actual).await??;
    *lock(&actual) = returned.clone();
    let identical = expected.is(&returned);
    match method {
        ExpectMethod::ToReturn if !identical => Err(ExpectError::mismatch(
            method,
            format!("Expected return value to be \"{}\".", expected),
        )
        .into()),
        ExpectMethod::ToNotReturn if identical => Err(ExpectError::mismatch(
            method,
            format!("Expected return value to not be \"{}\".", expected),
        )
        .into()),
        _ => Ok(()),
    }
}

async fn check_throws(kind: Option<ErrorKind>, actual: Arc<Mutex<Value>>) -> CheckResult {
    let method = ExpectMethod::ToThrow;
    match invoke(method, &actual).await? {
        Ok(_) => {
            let message = match &kind {
                Some(kind) => format!("Expected error {} to be thrown.", kind),
                None => "Expected an error to be thrown.".to_string(),
            };
            Err(ExpectError::mismatch(method, message).into())
        }
        Err(raised) => match &kind {
            Some(kind) if !raised.is(kind) => Err(ExpectError::mismatch(
                method,
                format!(
                    "Expected error {} to be thrown, but received \"{}\" instead.",
                    kind, raised
                ),
            )
            .into()),
            _ => Ok(()),
        },
    }
}

async fn check_not_throws(kind: Option<ErrorKind>, actual: Arc<Mutex<Value>>) -> CheckResult {
    let method = ExpectMethod::ToNotThrow;
    let raised = match invoke(method, &actual).await? {
        Ok(_) => return Ok(()),
        Err(raised) => raised,
    };
    match &kind {
        None => Err(ExpectError::mismatch(
            method,
            format!(
                "Expected an error to not be thrown, but received \"{}\" instead.",
                raised
            ),
        )
        .into()),
        Some(kind) if raised.is(kind) => Err(ExpectError::mismatch(
            method,
            format!("Expected {} to not be thrown.", raised),
        )
        .into()),
        Some(_) => Ok(()),
    }
}

/// Call the actual value; fails the check if it is not callable
async fn invoke(method: ExpectMethod, actual: &Mutex<Value>) -> Result<CallResult, CheckFailure> {
    let callable = {
        let value = lock(actual);
        match value.as_callable() {
            Some(callable) => callable.clone(),
            None => return Err(ExpectError::not_callable(method, &*value).into()),
        }
    };
    Ok(callable.call().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FailureCause, Raised};
    use crate::value::Callable;

    async fn evaluate(queue: &CheckQueue) -> Vec<CheckResult> {
        let mut results = Vec::new();
        for check in queue.drain() {
            results.push(check.run().await);
        }
        results
    }

    fn returning(value: &'static str) -> Callable {
        Callable::new(move || Ok(Value::from(value)))
    }

    fn raising(kind: &ErrorKind) -> Callable {
        let kind = kind.clone();
        Callable::new(move || Err(Raised::new(&kind, "Test Error")))
    }

    #[tokio::test]
    async fn test_checks_are_deferred() {
        let queue = CheckQueue::new();
        let expect = Expect::new(queue.clone());
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let f = Callable::new(move || {
            *lock(&counter) += 1;
            Ok(Value::Null)
        });

        expect.that(f).to_return(Value::Null);
        assert_eq!(queue.len(), 1);
        assert_eq!(*lock(&calls), 0);

        let results = evaluate(&queue).await;
        assert!(results[0].is_ok());
        assert_eq!(*lock(&calls), 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_to_be_uses_identity() {
        let queue = CheckQueue::new();
        let expect = Expect::new(queue.clone());
        let obj = Value::object();

        expect.that(true).to_be(true);
        expect.that(obj.clone()).to_be(obj);
        expect.that(true).to_be(false);
        expect.that(Value::object()).to_be(Value::object());

        let results = evaluate(&queue).await;
        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        let err = results[2].as_ref().unwrap_err();
        assert_eq!(err.method(), Some(ExpectMethod::ToBe));
        assert_eq!(
            err.to_string(),
            "expect.to_be: Expected value \"false\" but received value \"true\" instead."
        );
        assert!(results[3].is_err());
    }

    #[tokio::test]
    async fn test_to_not_be_negates_to_be() {
        let queue = CheckQueue::new();
        let expect = Expect::new(queue.clone());
        let obj = Value::object();

        expect.that(true).to_not_be(false);
        expect.that(Value::object()).to_not_be(Value::object());
        expect.that(true).to_not_be(true);
        expect.that(obj.clone()).to_not_be(obj);

        let results = evaluate(&queue).await;
        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        assert_eq!(
            results[2].as_ref().unwrap_err().to_string(),
            "expect.to_not_be: Expected value to not be \"true\"."
        );
        assert!(results[3].is_err());
    }

    #[tokio::test]
    async fn test_to_return() {
        let queue = CheckQueue::new();
        let expect = Expect::new(queue.clone());

        expect.that(returning("foobar")).to_return("foobar");
        expect.that(returning("foobar")).to_return("baz");
        expect.that(returning("foobar")).to_not_return("baz");
        expect.that(returning("foobar")).to_not_return("foobar");

        let results = evaluate(&queue).await;
        assert!(results[0].is_ok());
        assert_eq!(
            results[1].as_ref().unwrap_err().to_string(),
            "expect.to_return: Expected return value to be \"baz\"."
        );
        assert!(results[2].is_ok());
        assert_eq!(
            results[3].as_ref().unwrap_err().method(),
            Some(ExpectMethod::ToNotReturn)
        );
    }

    #[tokio::test]
    async fn test_to_return_replaces_actual() {
        let queue = CheckQueue::new();
        let expect = Expect::new(queue.clone());
        let expectation = expect.that(returning("foobar"));

        expectation.to_return("foobar");
        expectation.to_be("foobar");
        assert!(expectation.actual().is_callable());

        let results = evaluate(&queue).await;
        assert!(results.iter().all(Result::is_ok));
        assert!(expectation.actual().is(&Value::from("foobar")));
    }

    #[tokio::test]
    async fn test_suspending_callable() {
        let queue = CheckQueue::new();
        let expect = Expect::new(queue.clone());
        let kind = ErrorKind::new("TestError");
        let raise_kind = kind.clone();

        expect
            .that(Callable::suspending(|| async {
                tokio::task::yield_now().await;
                Ok::<Value, Raised>(Value::from(42))
            }))
            .to_return(42);
        expect
            .that(Callable::suspending(move || {
                let kind = raise_kind.clone();
                async move { Err::<Value, Raised>(Raised::new(&kind, "later")) }
            }))
            .to_throw(&kind);

        let results = evaluate(&queue).await;
        assert!(results.iter().all(Result::is_ok));
    }

    #[tokio::test]
    async fn test_not_callable_is_type_mismatch() {
        let queue = CheckQueue::new();
        let expect = Expect::new(queue.clone());

        expect.that(5).to_return(5);
        expect.that("x").to_not_return(5);
        expect.that(true).to_throw(None);
        expect.that(Value::Null).to_not_throw(None);

        let results = evaluate(&queue).await;
        for result in &results {
            match result {
                Err(CheckFailure::Expect(err)) => assert_eq!(err.cause, FailureCause::NotCallable),
                other => panic!("expected type mismatch, got {:?}", other),
            }
        }
        assert_eq!(
            results[0].as_ref().unwrap_err().to_string(),
            "expect.to_return: Expected function but received value \"5\" instead."
        );
    }

    #[tokio::test]
    async fn test_to_throw() {
        let queue = CheckQueue::new();
        let expect = Expect::new(queue.clone());
        let test_error = ErrorKind::new("TestError");
        let other_error = ErrorKind::new("OtherError");

        expect.that(raising(&test_error)).to_throw(None);
        expect.that(raising(&test_error)).to_throw(&test_error);
        expect.that(raising(&test_error)).to_throw(&ErrorKind::base());
        expect.that(returning("foobar")).to_throw(None);
        expect.that(raising(&test_error)).to_throw(&other_error);

        let results = evaluate(&queue).await;
        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        assert!(results[2].is_ok());
        assert_eq!(
            results[3].as_ref().unwrap_err().to_string(),
            "expect.to_throw: Expected an error to be thrown."
        );
        assert_eq!(
            results[4].as_ref().unwrap_err().to_string(),
            "expect.to_throw: Expected error OtherError to be thrown, but received \"TestError: Test Error\" instead."
        );
    }

    #[tokio::test]
    async fn test_to_not_throw() {
        let queue = CheckQueue::new();
        let expect = Expect::new(queue.clone());
        let test_error = ErrorKind::new("TestError");
        let other_error = ErrorKind::new("OtherError");

        expect.that(returning("foobar")).to_not_throw(None);
        expect.that(raising(&test_error)).to_not_throw(&other_error);
        expect.that(returning("foobar")).to_not_throw(&test_error);
        expect.that(raising(&test_error)).to_not_throw(None);
        expect.that(raising(&test_error)).to_not_throw(&test_error);

        let results = evaluate(&queue).await;
        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        assert!(results[2].is_ok());
        assert_eq!(
            results[3].as_ref().unwrap_err().to_string(),
            "expect.to_not_throw: Expected an error to not be thrown, but received \"TestError: Test Error\" instead."
        );
        assert_eq!(
            results[4].as_ref().unwrap_err().to_string(),
            "expect.to_not_throw: Expected TestError: Test Error to not be thrown."
        );
    }

    #[tokio::test]
    async fn test_to_return_propagates_raised_error() {
        let queue = CheckQueue::new();
        let expect = Expect::new(queue.clone());

        expect.that(raising(&ErrorKind::new("TestError"))).to_return("foobar");

        let results = evaluate(&queue).await;
        match &results[0] {
            Err(CheckFailure::Raised(raised)) => assert_eq!(raised.kind().name(), "TestError"),
            other => panic!("expected raised error, got {:?}", other),
        }
    }

    #[test]
    fn test_queue_preserves_registration_order() {
        let queue = CheckQueue::new();
        let expect = Expect::new(queue.clone());

        expect.that(1).to_be(1);
        expect.that(returning("a")).to_throw(None);
        expect.that(2).to_not_be(1);

        let methods: Vec<_> = queue.drain().iter().map(PendingCheck::method).collect();
        assert_eq!(
            methods,
            vec![ExpectMethod::ToBe, ExpectMethod::ToThrow, ExpectMethod::ToNotBe]
        );
    }
}
