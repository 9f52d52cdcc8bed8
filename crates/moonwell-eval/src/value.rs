//! Runtime values for the Moonwell runtime core.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::coroutine::Coroutine;
use crate::sequence::ValueSequence;
use crate::Result;

/// A runtime value in the Moonwell language.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// The absent value.
    #[default]
    Nil,
    /// A boolean value.
    Boolean(bool),
    /// An integer value.
    Integer(i64),
    /// A floating point value.
    Number(f64),
    /// A string value.
    String(String),
    /// A multi-value result appearing as an operand.
    Sequence(ValueSequence),
    /// A native callable.
    Function(Function),
    /// A coroutine handle.
    Coroutine(Coroutine),
    /// An opaque object owned by the embedding host.
    Host(HostValue),
}

impl Value {
    /// The runtime type of this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Nil => ValueType::Nil,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Integer(_) => ValueType::Integer,
            Value::Number(_) => ValueType::Number,
            Value::String(_) => ValueType::String,
            Value::Sequence(_) => ValueType::Sequence,
            Value::Function(_) => ValueType::Function,
            Value::Coroutine(_) => ValueType::Coroutine,
            Value::Host(host) => ValueType::Host(host.type_name.clone()),
        }
    }

    /// Collapse to a single value, as needed wherever exactly one value is
    /// expected. A sequence contributes its first element, or nil if empty.
    pub fn to_scalar(&self) -> Value {
        match self {
            Value::Sequence(seq) => seq.first(),
            other => other.clone(),
        }
    }

    /// Check if this value is nil.
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Render this value the way scripts see it when printed.
    pub fn to_string_value(&self) -> String {
        match self {
            Value::Nil => "nil".to_string(),
            Value::Boolean(b) => if *b { "true" } else { "false" }.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Number(n) => {
                if n.is_nan() {
                    "nan".to_string()
                } else if n.is_infinite() {
                    if *n > 0.0 { "inf" } else { "-inf" }.to_string()
                } else if *n == n.trunc() {
                    // Integral floats always carry a '.' or an exponent, never bare digits
                    if n.abs() < 1e15 {
                        format!("{:.1}", n)
                    } else {
                        format!("{:e}", n)
                    }
                } else {
                    format!("{}", n)
                }
            }
            Value::String(s) => s.clone(),
            Value::Sequence(seq) => {
                let items: Vec<String> = seq.iter().map(|v| v.to_string_value()).collect();
                items.join(", ")
            }
            Value::Function(func) => match func.name() {
                Some(name) => format!("function: {}", name),
                None => "function: <anonymous>".to_string(),
            },
            Value::Coroutine(co) => format!("coroutine: #{}", co.id()),
            Value::Host(host) => format!("<{}>", host.type_name()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Sequence(a), Value::Sequence(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Coroutine(a), Value::Coroutine(b)) => a.id() == b.id(),
            (Value::Host(a), Value::Host(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_value())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<ValueSequence> for Value {
    fn from(seq: ValueSequence) -> Self {
        Value::Sequence(seq)
    }
}

impl From<Function> for Value {
    fn from(func: Function) -> Self {
        Value::Function(func)
    }
}

impl From<Coroutine> for Value {
    fn from(co: Coroutine) -> Self {
        Value::Coroutine(co)
    }
}

impl From<HostValue> for Value {
    fn from(host: HostValue) -> Self {
        Value::Host(host)
    }
}

/// Runtime type names used by the conversion cascade.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// Accepts every value unchanged.
    Any,
    Nil,
    Boolean,
    Integer,
    Number,
    String,
    Sequence,
    Function,
    Coroutine,
    /// A host type, identified by the name its values carry.
    Host(Arc<str>),
}

impl ValueType {
    pub fn host(name: impl Into<Arc<str>>) -> Self {
        ValueType::Host(name.into())
    }

    pub fn name(&self) -> &str {
        match self {
            ValueType::Any => "any",
            ValueType::Nil => "nil",
            ValueType::Boolean => "boolean",
            ValueType::Integer => "integer",
            ValueType::Number => "number",
            ValueType::String => "string",
            ValueType::Sequence => "sequence",
            ValueType::Function => "function",
            ValueType::Coroutine => "coroutine",
            ValueType::Host(name) => name,
        }
    }

    /// The zero-initialized default of a builtin value-shaped type.
    ///
    /// Reference-shaped types have no default; nil stays nil for them.
    pub fn zero_value(&self) -> Option<Value> {
        match self {
            ValueType::Boolean => Some(Value::Boolean(false)),
            ValueType::Integer => Some(Value::Integer(0)),
            ValueType::Number => Some(Value::Number(0.0)),
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

type NativeFn = dyn Fn(ValueSequence) -> Result<ValueSequence> + Send + Sync;

/// A native callable. Arguments arrive as one sequence and results leave as
/// one, so calls compose with the multi-value rules.
#[derive(Clone)]
pub struct Function {
    name: Option<Arc<str>>,
    f: Arc<NativeFn>,
}

impl Function {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(ValueSequence) -> Result<ValueSequence> + Send + Sync + 'static,
    {
        Self {
            name: None,
            f: Arc::new(f),
        }
    }

    pub fn named<F>(name: impl Into<Arc<str>>, f: F) -> Self
    where
        F: Fn(ValueSequence) -> Result<ValueSequence> + Send + Sync + 'static,
    {
        Self {
            name: Some(name.into()),
            f: Arc::new(f),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn call(&self, args: ValueSequence) -> Result<ValueSequence> {
        (self.f)(args)
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        Arc::ptr_eq(&self.f, &other.f)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function").field("name", &self.name).finish()
    }
}

/// An opaque host object tagged with its host type name.
#[derive(Clone)]
pub struct HostValue {
    type_name: Arc<str>,
    data: Arc<dyn Any + Send + Sync>,
}

impl HostValue {
    pub fn new<T: Any + Send + Sync>(type_name: impl Into<Arc<str>>, data: T) -> Self {
        Self {
            type_name: type_name.into(),
            data: Arc::new(data),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.data.downcast_ref::<T>()
    }

    pub fn ptr_eq(&self, other: &HostValue) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostValue")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}
