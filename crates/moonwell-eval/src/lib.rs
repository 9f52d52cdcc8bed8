//! Moonwell runtime core.
//!
//! This crate provides the value model and coroutine scheduler of the
//! Moonwell scripting language: multi-value results and their flattening
//! rules, truthiness and typed conversions, and coroutines that trade
//! value sequences through a blocking resume/yield handshake. Errors raised
//! by scripts are modeled as `Error::Exception(Value)` and propagate using
//! Rust's `?` operator.

mod coerce;
mod config;
mod coroutine;
mod error;
mod flatten;
mod library;
pub mod logging;
mod runtime;
mod sequence;
mod value;
mod variadic;

pub use coerce::{truthy, ConversionRegistry, Converter};
pub use config::RuntimeConfig;
pub use coroutine::{
    Coroutine, CoroutineId, CoroutineStatus, PendingResume, ResumeResult, Scheduler,
};
pub use error::Error;
pub use flatten::flatten_result;
pub use library::{CoroutineLibrary, COROUTINE_FUNCTIONS};
pub use runtime::Runtime;
pub use sequence::ValueSequence;
pub use value::{Function, HostValue, Value, ValueType};
pub use variadic::VariadicParameters;

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;
