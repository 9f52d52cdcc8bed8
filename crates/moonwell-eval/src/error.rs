//! Error types for the Moonwell runtime core.

use thiserror::Error;

use crate::coroutine::CoroutineId;
use crate::value::Value;

#[derive(Error, Debug)]
pub enum Error {
    /// An error value raised by script code. Propagates with `?` until
    /// something (a coroutine boundary, the host) catches it.
    #[error("{0}")]
    Exception(Value),

    /// A runtime failure with the message scripts see verbatim.
    #[error("{0}")]
    Runtime(String),

    /// The conversion cascade found no way from `from` to `to`.
    #[error("cannot convert a '{from}' value to '{to}'")]
    Binding { from: String, to: String },

    #[error("attempt to yield from outside a coroutine")]
    YieldOutsideCoroutine,

    #[error("coroutine {0} is already being resumed")]
    ResumeInProgress(CoroutineId),

    /// Observed by a coroutine body after its handle was disposed.
    #[error("coroutine was cancelled")]
    Cancelled,

    #[error("failed to start coroutine worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl Error {
    pub fn runtime(message: impl Into<String>) -> Self {
        Error::Runtime(message.into())
    }

    pub fn binding(from: impl Into<String>, to: impl Into<String>) -> Self {
        Error::Binding {
            from: from.into(),
            to: to.into(),
        }
    }

    /// The value a script sees when it catches this error.
    ///
    /// Script-raised exceptions hand back their original value; every other
    /// error is rendered as a message string.
    pub fn into_payload(self) -> Value {
        match self {
            Error::Exception(value) => value,
            other => Value::String(other.to_string()),
        }
    }
}
