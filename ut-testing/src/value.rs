//! Values under test
//!
//! Expectations are written against a small dynamic value model. Primitive
//! values compare by value, while lists, objects and functions compare by
//! allocation, so two structurally equal objects are never identical.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use crate::error::Raised;

/// Result of invoking a [`Callable`]
pub type CallResult = Result<Value, Raised>;

type CallFn = dyn Fn() -> BoxFuture<'static, CallResult> + Send + Sync;

/// A zero-argument operation that may suspend before producing a value
#[derive(Clone)]
pub struct Callable {
    name: Option<Arc<str>>,
    func: Arc<CallFn>,
}

impl Callable {
    /// Wrap a synchronous closure
    pub fn new<F>(func: F) -> Self
    where
        F: Fn() -> CallResult + Send + Sync + 'static,
    {
        Self {
            name: None,
            func: Arc::new(move || futures_util::future::ready(func()).boxed()),
        }
    }

    /// Wrap a closure returning a future
    pub fn suspending<F, Fut>(func: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallResult> + Send + 'static,
    {
        Self {
            name: None,
            func: Arc::new(move || func().boxed()),
        }
    }

    /// Attach a display name used in failure messages
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(Arc::from(name.into()));
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Invoke the operation, awaiting it whether or not it suspends
    pub async fn call(&self) -> CallResult {
        (self.func)().await
    }

    fn same_as(&self, other: &Callable) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Shared handle to an object; identity is the allocation
#[derive(Debug, Clone)]
pub struct ObjectRef(Arc<BTreeMap<String, Value>>);

impl ObjectRef {
    pub fn new(fields: BTreeMap<String, Value>) -> Self {
        Self(Arc::new(fields))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn same_as(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// A value under test
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(Arc<str>),
    List(Arc<Vec<Value>>),
    Object(ObjectRef),
    Function(Callable),
}

impl Value {
    /// A fresh, empty object distinct from every other object
    pub fn object() -> Self {
        Value::Object(ObjectRef::new(BTreeMap::new()))
    }

    pub fn object_from<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let fields = fields.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Value::Object(ObjectRef::new(fields))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Arc::new(items))
    }

    /// Strict identity: value equality for primitives, allocation
    /// equality for lists, objects and functions
    pub fn is(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => Arc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => a.same_as(b),
            (Value::Function(a), Value::Function(b)) => a.same_as(b),
            _ => false,
        }
    }

    pub fn as_callable(&self) -> Option<&Callable> {
        match self {
            Value::Function(callable) => Some(callable),
            _ => None,
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Function(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::List(_) | Value::Object(_) => "object",
            Value::Function(_) => "function",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{}", s),
            Value::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
            Value::Object(_) => write!(f, "[object Object]"),
            Value::Function(callable) => match callable.name() {
                Some(name) => write!(f, "[Function: {}]", name),
                None => write!(f, "[Function (anonymous)]"),
            },
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<Callable> for Value {
    fn from(callable: Callable) -> Self {
        Value::Function(callable)
    }
}

impl From<ObjectRef> for Value {
    fn from(object: ObjectRef) -> Self {
        Value::Object(object)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::list(items)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}
