//! Instance configuration.
//!
//! Each component keeps its own tunables; `VmConfig` bundles them and
//! overlays the `VM_*` environment switches.

use core_types::ConfigError;
use dispatch::DispatchConfig;
use memory_manager::HeapConfig;
use specializer::SpeshConfig;

/// Every tunable of a VM instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VmConfig {
    /// Heap and collector
    pub heap: HeapConfig,
    /// Specializer
    pub spesh: SpeshConfig,
    /// Dispatch registry and inline caches
    pub dispatch: DispatchConfig,
}

impl VmConfig {
    /// Sets the heap configuration.
    pub fn with_heap(mut self, heap: HeapConfig) -> Self {
        self.heap = heap;
        self
    }

    /// Sets the specializer configuration.
    pub fn with_spesh(mut self, spesh: SpeshConfig) -> Self {
        self.spesh = spesh;
        self
    }

    /// Sets the dispatch configuration.
    pub fn with_dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Checks every component's settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.heap.validate()?;
        self.spesh.validate()?;
        self.dispatch.validate()
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().overlay(|var| std::env::var(var).ok())
    }

    /// Overlays switches read through `lookup`.
    ///
    /// # Arguments
    ///
    /// * `lookup` - Returns the raw value of a variable, `None` if unset
    ///
    /// # Returns
    ///
    /// The updated configuration, or the first unparsable switch.
    pub fn overlay(mut self, lookup: impl Fn(&'static str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(on) = flag(&lookup, "VM_SPESH_DISABLE")? {
            self.spesh.enabled = !on;
        }
        if let Some(on) = flag(&lookup, "VM_SPESH_INLINE_DISABLE")? {
            self.spesh.inline_enabled = !on;
        }
        if let Some(on) = flag(&lookup, "VM_SPESH_NODELAY")? {
            self.spesh.nodelay = on;
        }
        if let Some(on) = flag(&lookup, "VM_SPESH_BLOCKING")? {
            self.spesh.blocking = on;
        }
        if let Some(on) = flag(&lookup, "VM_GC_VERIFY")? {
            self.heap.verify_heap = on;
        }
        if let Some(raw) = lookup("VM_NURSERY_SIZE") {
            self.heap.nursery_size = raw.trim().parse().map_err(|_| ConfigError::BadEnv {
                var: "VM_NURSERY_SIZE",
                value: raw.clone(),
            })?;
        }
        Ok(self)
    }
}

fn flag(lookup: &impl Fn(&'static str) -> Option<String>, var: &'static str) -> Result<Option<bool>, ConfigError> {
    let Some(raw) = lookup(var) else { return Ok(None) };
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "0" | "false" | "no" | "off" => Ok(Some(false)),
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        _ => Err(ConfigError::BadEnv { var, value: raw }),
    }
}
