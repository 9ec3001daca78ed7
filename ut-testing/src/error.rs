//! Error types raised by user code and by failed expectations

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Identifier of the base kind every other kind derives from
pub const BASE_KIND: &str = "Error";

/// A kind of raised error, optionally derived from a parent kind.
///
/// Kinds are matched by identifier along the parent chain, so a check for
/// `Error` matches every kind created with [`ErrorKind::new`].
#[derive(Debug, Clone)]
pub struct ErrorKind(Arc<KindNode>);

#[derive(Debug)]
struct KindNode {
    name: String,
    parent: Option<ErrorKind>,
}

impl ErrorKind {
    /// The root kind
    pub fn base() -> Self {
        Self(Arc::new(KindNode {
            name: BASE_KIND.to_string(),
            parent: None,
        }))
    }

    /// A kind deriving from the base kind
    pub fn new(name: impl Into<String>) -> Self {
        Self::extends(name, &Self::base())
    }

    pub fn extends(name: impl Into<String>, parent: &ErrorKind) -> Self {
        Self(Arc::new(KindNode {
            name: name.into(),
            parent: Some(parent.clone()),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn parent(&self) -> Option<&ErrorKind> {
        self.0.parent.as_ref()
    }

    /// True if this kind is `other` or derives from it
    pub fn is_a(&self, other: &ErrorKind) -> bool {
        let mut current = Some(self);
        while let Some(kind) = current {
            if kind.name() == other.name() {
                return true;
            }
            current = kind.parent();
        }
        false
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A failure raised by code under test
#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct Raised {
    kind: ErrorKind,
    message: String,
}

impl Raised {
    pub fn new(kind: &ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind: kind.clone(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Instance-of check by kind identifier
    pub fn is(&self, kind: &ErrorKind) -> bool {
        self.kind.is_a(kind)
    }
}

/// The assertion that produced a check failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpectMethod {
    ToBe,
    ToNotBe,
    ToReturn,
    ToNotReturn,
    ToThrow,
    ToNotThrow,
}

impl ExpectMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpectMethod::ToBe => "to_be",
            ExpectMethod::ToNotBe => "to_not_be",
            ExpectMethod::ToReturn => "to_return",
            ExpectMethod::ToNotReturn => "to_not_return",
            ExpectMethod::ToThrow => "to_throw",
            ExpectMethod::ToNotThrow => "to_not_throw",
        }
    }
}

impl fmt::Display for ExpectMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an expectation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    /// The asserted condition did not hold
    Mismatch,
    /// The actual value had to be callable and was not
    NotCallable,
}

/// A failed expectation, tagged with the method that registered it
#[derive(Error, Debug, Clone)]
#[error("expect.{method}: {message}")]
pub struct ExpectError {
    pub method: ExpectMethod,
    pub cause: FailureCause,
    pub message: String,
}

impl ExpectError {
    pub fn mismatch(method: ExpectMethod, message: impl Into<String>) -> Self {
        Self {
            method,
            cause: FailureCause::Mismatch,
            message: message.into(),
        }
    }

    pub fn not_callable(method: ExpectMethod, actual: impl fmt::Display) -> Self {
        Self {
            method,
            cause: FailureCause::NotCallable,
            message: format!("Expected function but received value \"{}\" instead.", actual),
        }
    }
}

/// Failure of a single pending check
#[derive(Error, Debug, Clone)]
pub enum CheckFailure {
    #[error(transparent)]
    Expect(#[from] ExpectError),

    /// The wrapped callable raised where a return value was expected
    #[error(transparent)]
    Raised(#[from] Raised),

    #[error("check panicked: {0}")]
    Panicked(String),
}

impl CheckFailure {
    /// Tag of the originating method, if the failure came from an expectation
    pub fn method(&self) -> Option<ExpectMethod> {
        match self {
            CheckFailure::Expect(err) => Some(err.method),
            _ => None,
        }
    }
}
