//! The `coroutine` library as scripts call it.
//!
//! Every entry is a plain [`Function`] taking its positional arguments as one
//! sequence, so generated code calls these exactly like script functions.

use crate::coroutine::{Coroutine, Scheduler};
use crate::error::Error;
use crate::sequence::ValueSequence;
use crate::value::{Function, Value};
use crate::variadic::VariadicParameters;
use crate::{seq, Result};

/// Names exported by the library, in registration order.
pub const COROUTINE_FUNCTIONS: &[&str] = &[
    "create",
    "resume",
    "yield",
    "status",
    "running",
    "wrap",
    "isyieldable",
    "close",
];

/// Builder for the script-visible `coroutine` table.
///
/// `resume` and wrapped functions block the calling thread until the
/// coroutine yields. Embedders driving scripts from async code should run
/// them on a blocking thread or use [`Scheduler::begin_resume`] directly.
#[derive(Debug, Clone)]
pub struct CoroutineLibrary {
    scheduler: Scheduler,
}

impl CoroutineLibrary {
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }

    /// Look up one library function by its script name.
    pub fn function(&self, name: &str) -> Option<Function> {
        let scheduler = self.scheduler.clone();
        let func = match name {
            "create" => Function::named("create", move |args| {
                let args = VariadicParameters::from(args);
                let body = expect_function(&args, "create")?;
                Ok(seq![scheduler.create(body)])
            }),
            "resume" => Function::named("resume", move |args| {
                let args = VariadicParameters::from(args);
                let co = expect_coroutine(&args, "resume")?;
                let result = scheduler.resume(&co, args.select(2)?)?;
                Ok(result.into_sequence())
            }),
            "yield" => Function::named("yield", move |args| scheduler.yield_values(args)),
            "status" => Function::named("status", move |args| {
                let args = VariadicParameters::from(args);
                let co = expect_coroutine(&args, "status")?;
                Ok(seq![scheduler.status(&co).as_str()])
            }),
            "running" => Function::named("running", move |_args| {
                let (current, is_main) = scheduler.running();
                let current = current.map(Value::Coroutine).unwrap_or_default();
                Ok(seq![current, is_main])
            }),
            "wrap" => Function::named("wrap", move |args| {
                let args = VariadicParameters::from(args);
                let body = expect_function(&args, "wrap")?;
                Ok(seq![scheduler.wrap(body)])
            }),
            "isyieldable" => Function::named("isyieldable", move |_args| {
                Ok(seq![scheduler.is_yieldable()])
            }),
            "close" => Function::named("close", move |args| {
                let args = VariadicParameters::from(args);
                let co = expect_coroutine(&args, "close")?;
                scheduler.dispose(&co);
                Ok(seq![true])
            }),
            _ => return None,
        };
        Some(func)
    }

    /// All library functions, paired with their names.
    pub fn functions(&self) -> Vec<(&'static str, Function)> {
        COROUTINE_FUNCTIONS
            .iter()
            .filter_map(|name| self.function(name).map(|f| (*name, f)))
            .collect()
    }

    /// Call a library function by name.
    pub fn call(&self, name: &str, args: ValueSequence) -> Result<ValueSequence> {
        let func = self
            .function(name)
            .ok_or_else(|| Error::runtime(format!("attempt to call a nil value (field '{}')", name)))?;
        func.call(args)
    }
}

fn expect_coroutine(args: &VariadicParameters, fname: &str) -> Result<Coroutine> {
    match args.get(1) {
        Value::Coroutine(co) => Ok(co),
        _ => Err(bad_argument(fname, "coroutine")),
    }
}

fn expect_function(args: &VariadicParameters, fname: &str) -> Result<Function> {
    match args.get(1) {
        Value::Function(func) => Ok(func),
        _ => Err(bad_argument(fname, "function")),
    }
}

fn bad_argument(fname: &str, expected: &str) -> Error {
    Error::runtime(format!("bad argument #1 to '{}' ({} expected)", fname, expected))
}
