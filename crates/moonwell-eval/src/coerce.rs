//! Truthiness and the value-to-type conversion cascade.
//!
//! Every boolean context (`if`, `while`, `and`, `or`) goes through
//! [`truthy`]. Typed assignment sites go through
//! [`ConversionRegistry::convert`], which tries, in order: the boolean rule,
//! nil defaults, a native match, a conversion declared by the source type, a
//! conversion declared by the target type, and finally a binding error.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::Error;
use crate::value::{Value, ValueType};
use crate::Result;

/// Only nil and `false` are falsy. Zero, the empty string and the empty
/// sequence are all true.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Nil => false,
        Value::Boolean(b) => *b,
        Value::Integer(_)
        | Value::Number(_)
        | Value::String(_)
        | Value::Sequence(_)
        | Value::Function(_)
        | Value::Coroutine(_)
        | Value::Host(_) => true,
    }
}

/// A conversion from one runtime type to another. May itself fail.
pub type Converter = Arc<dyn Fn(&Value) -> Result<Value> + Send + Sync>;

/// Conversions declared by types, populated before scripts run.
#[derive(Clone, Default)]
pub struct ConversionRegistry {
    /// `(source, target)`: conversions a source type offers toward a target.
    source_declared: HashMap<(ValueType, ValueType), Converter>,
    /// `(target, source)`: conversions a target type accepts from a source.
    target_declared: HashMap<(ValueType, ValueType), Converter>,
    /// Defaults for host types that behave like values rather than references.
    defaults: HashMap<ValueType, Value>,
}

impl ConversionRegistry {
    /// An empty registry: only native matches and the nil/boolean rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the numeric and string conversions every script expects.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        registry.declare_conversion(ValueType::Integer, ValueType::Number, |v| match v {
            Value::Integer(i) => Ok(Value::Number(*i as f64)),
            other => Err(mismatch(other, &ValueType::Number)),
        });
        registry.declare_conversion(ValueType::Number, ValueType::Integer, |v| match v {
            Value::Number(n) => float_to_integer(*n)
                .map(Value::Integer)
                .ok_or_else(|| Error::runtime("number has no integer representation")),
            other => Err(mismatch(other, &ValueType::Integer)),
        });
        registry.declare_conversion(ValueType::Integer, ValueType::String, |v| {
            Ok(Value::String(v.to_string_value()))
        });
        registry.declare_conversion(ValueType::Number, ValueType::String, |v| {
            Ok(Value::String(v.to_string_value()))
        });

        registry.declare_acceptance(ValueType::Number, ValueType::String, |v| match v {
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Number)
                .map_err(|_| mismatch(v, &ValueType::Number)),
            other => Err(mismatch(other, &ValueType::Number)),
        });
        registry.declare_acceptance(ValueType::Integer, ValueType::String, |v| match v {
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| mismatch(v, &ValueType::Integer)),
            other => Err(mismatch(other, &ValueType::Integer)),
        });

        registry
    }

    /// Register a conversion declared by `source` toward `target`.
    pub fn declare_conversion<F>(&mut self, source: ValueType, target: ValueType, f: F)
    where
        F: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.source_declared.insert((source, target), Arc::new(f));
    }

    /// Register a conversion declared by `target`, accepting `source` values.
    pub fn declare_acceptance<F>(&mut self, target: ValueType, source: ValueType, f: F)
    where
        F: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.target_declared.insert((target, source), Arc::new(f));
    }

    /// Mark a host type as value-shaped, with `value` as its zero default.
    pub fn declare_default(&mut self, ty: ValueType, value: Value) {
        self.defaults.insert(ty, value);
    }

    /// The value nil converts to for `ty`: its zero default if it is
    /// value-shaped, nil otherwise.
    pub fn default_for(&self, ty: &ValueType) -> Value {
        ty.zero_value()
            .or_else(|| self.defaults.get(ty).cloned())
            .unwrap_or(Value::Nil)
    }

    /// Convert `value` to `target`.
    pub fn convert(&self, value: &Value, target: &ValueType) -> Result<Value> {
        if *target == ValueType::Boolean {
            return Ok(Value::Boolean(truthy(value)));
        }

        if value.is_nil() {
            return Ok(self.default_for(target));
        }

        let source = value.value_type();
        if *target == ValueType::Any || source == *target {
            return Ok(value.clone());
        }

        if let Some(converter) = self.source_declared.get(&(source.clone(), target.clone())) {
            tracing::trace!(from = %source, to = %target, "source-declared conversion");
            return converter(value);
        }

        if let Some(converter) = self.target_declared.get(&(target.clone(), source.clone())) {
            tracing::trace!(from = %source, to = %target, "target-declared conversion");
            return converter(value);
        }

        Err(Error::binding(source.name(), target.name()))
    }
}

impl fmt::Debug for ConversionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionRegistry")
            .field("source_declared", &self.source_declared.keys().collect::<Vec<_>>())
            .field("target_declared", &self.target_declared.keys().collect::<Vec<_>>())
            .field("defaults", &self.defaults)
            .finish()
    }
}

fn mismatch(value: &Value, target: &ValueType) -> Error {
    Error::binding(value.value_type().name(), target.name())
}

fn float_to_integer(n: f64) -> Option<i64> {
    // i64::MAX as f64 rounds up to 2^63, so the upper bound is exclusive
    if n.fract() == 0.0 && n >= i64::MIN as f64 && n < i64::MAX as f64 {
        Some(n as i64)
    } else {
        None
    }
}
