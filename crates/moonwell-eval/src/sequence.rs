//! Multi-value results.
//!
//! A [`ValueSequence`] is what an expression list evaluates to: the values of
//! a `return a, b, c`, the arguments of a call, the results of `resume`.
//! Only the last item of an operand list expands fully; every earlier item
//! contributes exactly one value.

use std::fmt;
use std::sync::Arc;

use crate::flatten::flatten_result;
use crate::value::Value;

/// An immutable, ordered, fixed-length list of values, indexed from zero.
///
/// Never contains a [`Value::Sequence`] element: construction always
/// flattens exactly one level. Cloning is cheap; the empty sequence does not
/// allocate.
#[derive(Clone, Default)]
pub struct ValueSequence {
    values: Option<Arc<[Value]>>,
}

impl ValueSequence {
    /// The shared empty sequence.
    pub const fn empty() -> Self {
        Self { values: None }
    }

    /// Wrap a scalar as a one-element sequence. A sequence is passed through.
    pub fn single(value: Value) -> Self {
        match value {
            Value::Sequence(seq) => seq,
            scalar => Self::from_flat(vec![scalar]),
        }
    }

    /// Build a sequence from an evaluated operand list.
    ///
    /// A lone sequence operand is returned as-is, without re-wrapping.
    /// Otherwise every operand but the last contributes one value (the first
    /// element of a sequence, nil for an empty one) and the last operand is
    /// spliced in full if it is a sequence.
    pub fn from_operands(mut operands: Vec<Value>) -> Self {
        if operands.len() == 1 && matches!(operands[0], Value::Sequence(_)) {
            if let Some(Value::Sequence(seq)) = operands.pop() {
                return seq;
            }
        }

        let Some(last) = operands.pop() else {
            return Self::empty();
        };

        let mut values = Vec::with_capacity(operands.len() + 1);
        for operand in operands {
            values.push(match operand {
                Value::Sequence(seq) => seq.first(),
                scalar => scalar,
            });
        }

        match last {
            Value::Sequence(tail) => values.extend(tail.iter().cloned()),
            scalar => values.push(scalar),
        }

        Self::from_flat(values)
    }

    /// Build a sequence from a plain values list.
    ///
    /// Nested sequences in the list are normalized with the result
    /// flattening rule, so `from_values(seq.to_vec()) == seq` always holds.
    pub fn from_values(values: Vec<Value>) -> Self {
        if values.iter().any(|v| matches!(v, Value::Sequence(_))) {
            flatten_result(&values)
        } else {
            Self::from_flat(values)
        }
    }

    /// Wrap values already known to contain no nested sequence.
    pub(crate) fn from_flat(values: Vec<Value>) -> Self {
        debug_assert!(!values.iter().any(|v| matches!(v, Value::Sequence(_))));
        if values.is_empty() {
            Self::empty()
        } else {
            Self {
                values: Some(values.into()),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_none()
    }

    /// Positional access. Out-of-range reads yield nil.
    pub fn get(&self, index: usize) -> Value {
        self.as_slice().get(index).cloned().unwrap_or_default()
    }

    /// The first value, or nil for the empty sequence.
    pub fn first(&self) -> Value {
        self.get(0)
    }

    /// Collapse to scalar context.
    pub fn to_scalar(&self) -> Value {
        self.first()
    }

    pub fn as_slice(&self) -> &[Value] {
        self.values.as_deref().unwrap_or(&[])
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.as_slice().iter()
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.as_slice().to_vec()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.to_vec()
    }

    /// Build `(head, self...)`, as `resume` does with its status flag.
    pub fn prepend(&self, head: Value) -> Self {
        let mut values = Vec::with_capacity(self.len() + 1);
        values.push(head.to_scalar());
        values.extend(self.iter().cloned());
        Self::from_flat(values)
    }

    /// True if both refer to the same storage (or are both empty).
    pub fn ptr_eq(&self, other: &ValueSequence) -> bool {
        match (&self.values, &other.values) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl PartialEq for ValueSequence {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl fmt::Debug for ValueSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl From<Vec<Value>> for ValueSequence {
    fn from(values: Vec<Value>) -> Self {
        Self::from_values(values)
    }
}

impl FromIterator<Value> for ValueSequence {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::from_values(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ValueSequence {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Build a [`ValueSequence`] from values convertible into [`Value`].
#[macro_export]
macro_rules! seq {
    () => {
        $crate::ValueSequence::empty()
    };
    ($($value:expr),+ $(,)?) => {
        $crate::ValueSequence::from_values(vec![$($crate::Value::from($value)),+])
    };
}
