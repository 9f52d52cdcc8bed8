//! Normalization of a function's produced values into its result.

use crate::sequence::ValueSequence;
use crate::value::Value;

/// Synthesize a return value from the raw values a function produced.
///
/// A trailing sequence is spliced onto the rest; every other nested sequence
/// is truncated to its first value (nil if empty). Flattening a flat list is
/// a no-op, and the contents always agree with
/// [`ValueSequence::from_operands`] on the same list.
pub fn flatten_result(raw: &[Value]) -> ValueSequence {
    let Some((last, prefix)) = raw.split_last() else {
        return ValueSequence::empty();
    };

    let mut values: Vec<Value> = prefix.iter().map(Value::to_scalar).collect();
    match last {
        Value::Sequence(tail) => values.extend(tail.iter().cloned()),
        scalar => values.push(scalar.clone()),
    }

    ValueSequence::from_flat(values)
}
