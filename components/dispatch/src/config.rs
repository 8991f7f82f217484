//! Dispatch limits.

use crate::inline_cache::MAX_POLYMORPHISM;
use core_types::ConfigError;

/// Slots of a fresh dispatcher table.
pub const DEFAULT_REGISTRY_CAPACITY: usize = 32;

/// Tunables of dispatch resolution and caching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Programs a polymorphic inline cache slot holds before it goes
    /// megamorphic
    pub max_polymorphism: usize,
    /// Initial slot count of the dispatcher table; a power of two
    pub registry_capacity: usize,
    /// How deep resolvers may delegate to one another
    pub max_delegation_depth: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            max_polymorphism: MAX_POLYMORPHISM,
            registry_capacity: DEFAULT_REGISTRY_CAPACITY,
            max_delegation_depth: 16,
        }
    }
}

impl DispatchConfig {
    /// Sets the polymorphism limit.
    pub fn with_max_polymorphism(mut self, programs: usize) -> Self {
        self.max_polymorphism = programs;
        self
    }

    /// Sets the initial registry capacity.
    pub fn with_registry_capacity(mut self, slots: usize) -> Self {
        self.registry_capacity = slots;
        self
    }

    /// Checks that every setting is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_POLYMORPHISM).contains(&self.max_polymorphism) {
            return Err(ConfigError::OutOfRange {
                name: "max_polymorphism",
                value: self.max_polymorphism,
                min: 1,
                max: MAX_POLYMORPHISM,
            });
        }
        if self.registry_capacity == 0 {
            return Err(ConfigError::Zero("registry_capacity"));
        }
        if !self.registry_capacity.is_power_of_two() {
            return Err(ConfigError::OutOfRange {
                name: "registry_capacity",
                value: self.registry_capacity,
                min: 1,
                max: usize::MAX,
            });
        }
        if self.max_delegation_depth == 0 {
            return Err(ConfigError::Zero("max_delegation_depth"));
        }
        Ok(())
    }
}
