//! Runtime environment for embedding Moonwell.

use crate::coerce::{self, ConversionRegistry};
use crate::config::RuntimeConfig;
use crate::coroutine::Scheduler;
use crate::library::CoroutineLibrary;
use crate::value::{Value, ValueType};
use crate::Result;

/// Process-scoped state of one embedded runtime.
///
/// Holds the conversion registry and the coroutine scheduler. Nothing here
/// is global: every `Runtime` is independent of every other.
#[derive(Debug)]
pub struct Runtime {
    config: RuntimeConfig,
    conversions: ConversionRegistry,
    scheduler: Scheduler,
}

impl Runtime {
    /// Create a runtime with the builtin conversions registered.
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            scheduler: Scheduler::new(config.clone()),
            conversions: ConversionRegistry::with_builtins(),
            config,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn conversions(&self) -> &ConversionRegistry {
        &self.conversions
    }

    /// Register host conversions. Meant for setup, before scripts run.
    pub fn conversions_mut(&mut self) -> &mut ConversionRegistry {
        &mut self.conversions
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// The `coroutine` library bound to this runtime's scheduler.
    pub fn coroutine_library(&self) -> CoroutineLibrary {
        CoroutineLibrary::new(self.scheduler.clone())
    }

    /// Convert a value for a typed assignment site.
    pub fn convert(&self, value: &Value, target: &ValueType) -> Result<Value> {
        self.conversions.convert(value, target)
    }

    /// Evaluate a value in boolean context.
    pub fn truthy(&self, value: &Value) -> bool {
        coerce::truthy(value)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}
