//! Dynamic value model for host exports.
//!
//! # Responsibility
//! - Represent whatever a foreign loader exported without assuming a nominal
//!   type: scalars, lists, objects with fallible property access, functions.
//! - Provide structural accessors (`get_property`, `get_path`) used by shape
//!   matching and probing.
//!
//! # Invariants
//! - Property access never panics inside this module; host failures surface
//!   as `HostError`.
//! - `HostFunction` identity is reference identity of its body.

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::sync::{Arc, RwLock};

/// Result type for host-side operations.
pub type HostResult<T> = Result<T, HostError>;

/// Failure raised by host code (a "throw" on the host side).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// Host function threw while executing.
    Thrown(String),
    /// Property getter failed.
    PropertyAccess { key: String, message: String },
    /// Property cannot be written.
    ReadOnly { key: String },
    /// Rust-side panic captured at an isolation boundary.
    Panicked(String),
}

impl HostError {
    pub fn thrown(message: impl Into<String>) -> Self {
        Self::Thrown(message.into())
    }
}

impl Display for HostError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Thrown(message) => write!(f, "host function threw: {message}"),
            Self::PropertyAccess { key, message } => {
                write!(f, "property `{key}` access failed: {message}")
            }
            Self::ReadOnly { key } => write!(f, "property `{key}` is read-only"),
            Self::Panicked(message) => write!(f, "host call panicked: {message}"),
        }
    }
}

impl Error for HostError {}

/// Object view exposed by the host.
///
/// Implementors decide how properties are stored; getters and setters are
/// allowed to fail the way host objects do.
pub trait HostObject: Send + Sync {
    fn get(&self, key: &str) -> HostResult<Option<HostValue>>;
    fn set(&self, key: &str, value: HostValue) -> HostResult<()>;
    fn keys(&self) -> Vec<String>;
}

type NativeBody = dyn Fn(&[HostValue]) -> HostResult<HostValue> + Send + Sync;

/// Callable host value.
#[derive(Clone)]
pub struct HostFunction {
    name: Arc<str>,
    body: Arc<NativeBody>,
}

impl HostFunction {
    pub fn new(
        name: impl Into<String>,
        body: impl Fn(&[HostValue]) -> HostResult<HostValue> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: Arc::from(name.into()),
            body: Arc::new(body),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: &[HostValue]) -> HostResult<HostValue> {
        (self.body)(args)
    }

    /// Returns true when both handles point at the same function body.
    pub fn same_as(&self, other: &HostFunction) -> bool {
        Arc::ptr_eq(&self.body, &other.body)
    }
}

impl Debug for HostFunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "HostFunction({})", self.name)
    }
}

/// Opaque, structurally-typed host value.
#[derive(Clone)]
pub enum HostValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<HostValue>),
    Object(Arc<dyn HostObject>),
    Function(HostFunction),
}

impl HostValue {
    /// Wraps one object implementation as a shared host value.
    pub fn object(object: impl HostObject + 'static) -> Self {
        Self::Object(Arc::new(object))
    }

    pub fn function(
        name: impl Into<String>,
        body: impl Fn(&[HostValue]) -> HostResult<HostValue> + Send + Sync + 'static,
    ) -> Self {
        Self::Function(HostFunction::new(name, body))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::Text(_) => "text",
            Self::List(_) => "list",
            Self::Object(_) => "object",
            Self::Function(_) => "function",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns true for values that carry content: non-empty text, lists and
    /// objects, plus every scalar and function.
    pub fn is_non_empty(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Text(value) => !value.is_empty(),
            Self::List(items) => !items.is_empty(),
            Self::Object(object) => !object.keys().is_empty(),
            Self::Bool(_) | Self::Number(_) | Self::Function(_) => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[HostValue]> {
        match self {
            Self::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Arc<dyn HostObject>> {
        match self {
            Self::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&HostFunction> {
        match self {
            Self::Function(function) => Some(function),
            _ => None,
        }
    }

    /// Reads one property.
    ///
    /// Functions expose their `name`; scalars and lists expose nothing.
    pub fn get_property(&self, key: &str) -> HostResult<Option<HostValue>> {
        match self {
            Self::Object(object) => object.get(key),
            Self::Function(function) if key == "name" => {
                Ok(Some(Self::Text(function.name().to_string())))
            }
            _ => Ok(None),
        }
    }

    /// Resolves a dotted path such as `default.getMessages`.
    ///
    /// Returns `Ok(None)` when any segment is missing.
    pub fn get_path(&self, path: &str) -> HostResult<Option<HostValue>> {
        let mut current = self.clone();
        for segment in path.split('.') {
            if segment.is_empty() {
                return Ok(None);
            }
            match current.get_property(segment)? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }
}

impl Debug for HostValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Number(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value:?}"),
            Self::List(items) => f.debug_list().entries(items.iter()).finish(),
            Self::Object(object) => write!(f, "#<object keys={:?}>", object.keys()),
            Self::Function(function) => write!(f, "#<function {}>", function.name()),
        }
    }
}

impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(left), Self::Bool(right)) => left == right,
            (Self::Number(left), Self::Number(right)) => left == right,
            (Self::Text(left), Self::Text(right)) => left == right,
            (Self::List(left), Self::List(right)) => left == right,
            (Self::Object(left), Self::Object(right)) => Arc::ptr_eq(left, right),
            (Self::Function(left), Self::Function(right)) => left.same_as(right),
            _ => false,
        }
    }
}

impl From<bool> for HostValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for HostValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for HostValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<HostValue>> for HostValue {
    fn from(value: Vec<HostValue>) -> Self {
        Self::List(value)
    }
}

impl From<HostFunction> for HostValue {
    fn from(value: HostFunction) -> Self {
        Self::Function(value)
    }
}

/// Plain in-memory object with infallible property access.
#[derive(Default)]
pub struct PlainObject {
    props: RwLock<BTreeMap<String, HostValue>>,
}

impl PlainObject {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style property insertion.
    pub fn with(self, key: impl Into<String>, value: impl Into<HostValue>) -> Self {
        self.props
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.into(), value.into());
        self
    }

    /// Builder-style method insertion.
    pub fn with_method(
        self,
        key: impl Into<String>,
        body: impl Fn(&[HostValue]) -> HostResult<HostValue> + Send + Sync + 'static,
    ) -> Self {
        let key = key.into();
        let function = HostFunction::new(key.clone(), body);
        self.with(key, function)
    }

    pub fn into_value(self) -> HostValue {
        HostValue::object(self)
    }
}

impl HostObject for PlainObject {
    fn get(&self, key: &str) -> HostResult<Option<HostValue>> {
        Ok(self
            .props
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: HostValue) -> HostResult<()> {
        self.props
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value);
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.props
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}
