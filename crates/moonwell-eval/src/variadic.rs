//! The `...` capture of a call site.

use crate::error::Error;
use crate::sequence::ValueSequence;
use crate::value::Value;

/// Trailing call arguments, indexed from 1 as scripts index them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariadicParameters {
    values: ValueSequence,
}

impl VariadicParameters {
    pub fn new(values: ValueSequence) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 1-based access. Index 0, negative indices and indices past the end
    /// yield nil.
    pub fn get(&self, index: i64) -> Value {
        match usize::try_from(index) {
            Ok(i) if i >= 1 => self.values.get(i - 1),
            _ => Value::Nil,
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.values.iter()
    }

    pub fn as_sequence(&self) -> &ValueSequence {
        &self.values
    }

    pub fn into_sequence(self) -> ValueSequence {
        self.values
    }

    /// `select('#', ...)`
    pub fn select_count(&self) -> usize {
        self.len()
    }

    /// `select(n, ...)`: every value from position `n` on. Negative `n`
    /// counts back from the end.
    pub fn select(&self, n: i64) -> Result<ValueSequence, Error> {
        let len = i64::try_from(self.len()).unwrap_or(i64::MAX);
        let start = if n < 0 { len + n } else { n - 1 };
        if n == 0 || start < 0 {
            return Err(Error::runtime(
                "bad argument #1 to 'select' (index out of range)",
            ));
        }

        let start = usize::try_from(start).unwrap_or(usize::MAX);
        match self.values.as_slice().get(start..) {
            Some(rest) => Ok(ValueSequence::from_flat(rest.to_vec())),
            None => Ok(ValueSequence::empty()),
        }
    }
}

impl From<ValueSequence> for VariadicParameters {
    fn from(values: ValueSequence) -> Self {
        Self::new(values)
    }
}

impl From<Vec<Value>> for VariadicParameters {
    fn from(values: Vec<Value>) -> Self {
        Self::new(ValueSequence::from_values(values))
    }
}

impl From<VariadicParameters> for ValueSequence {
    fn from(params: VariadicParameters) -> Self {
        params.into_sequence()
    }
}
