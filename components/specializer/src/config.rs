//! Specializer configuration.

use core_types::ConfigError;

/// Default number of entries a thread logs before sending a batch.
pub const DEFAULT_LOG_SIZE: usize = 8192;
/// Default number of stats versions a routine's stats survive unrefreshed.
pub const DEFAULT_MAX_AGE: u64 = 10;
/// Default share of callsite hits a type tuple needs for its own plan.
pub const DEFAULT_PLAN_PERCENTAGE: u32 = 25;
/// Default largest callee, in instructions, that may be inlined.
pub const DEFAULT_MAX_INLINE_SIZE: usize = 192;
/// Default deoptimizations a candidate survives.
pub const DEFAULT_MAX_DEOPTS: u32 = 10;

/// Tunables of the specializer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeshConfig {
    /// Specialization on or off
    pub enabled: bool,
    /// Inlining on or off
    pub inline_enabled: bool,
    /// Specialize after the first call
    pub nodelay: bool,
    /// Threads wait for their log batches to be processed
    pub blocking: bool,
    /// Entries per log batch
    pub log_size: usize,
    /// Versions a routine's stats live without an update
    pub max_age: u64,
    /// Share of callsite hits, in percent, that earns a typed plan
    pub plan_percentage: u32,
    /// Largest inlinable callee
    pub max_inline_size: usize,
    /// Deopts before a candidate is discarded
    pub max_deopts: u32,
    /// Candidates per routine
    pub max_candidates: usize,
    /// Entries kept per offset and per observation kind
    pub max_offset_entries: usize,
}

impl Default for SpeshConfig {
    fn default() -> Self {
        SpeshConfig {
            enabled: true,
            inline_enabled: true,
            nodelay: false,
            blocking: false,
            log_size: DEFAULT_LOG_SIZE,
            max_age: DEFAULT_MAX_AGE,
            plan_percentage: DEFAULT_PLAN_PERCENTAGE,
            max_inline_size: DEFAULT_MAX_INLINE_SIZE,
            max_deopts: DEFAULT_MAX_DEOPTS,
            max_candidates: 8,
            max_offset_entries: 8,
        }
    }
}

impl SpeshConfig {
    /// Turns specialization on or off.
    pub fn with_enabled(mut self, on: bool) -> Self {
        self.enabled = on;
        self
    }

    /// Turns inlining on or off.
    pub fn with_inline(mut self, on: bool) -> Self {
        self.inline_enabled = on;
        self
    }

    /// Specialize after the first call.
    pub fn with_nodelay(mut self, on: bool) -> Self {
        self.nodelay = on;
        self
    }

    /// Makes log flushes wait for the worker.
    pub fn with_blocking(mut self, on: bool) -> Self {
        self.blocking = on;
        self
    }

    /// Sets the log batch size.
    pub fn with_log_size(mut self, entries: usize) -> Self {
        self.log_size = entries;
        self
    }

    /// Sets the deopt limit.
    pub fn with_max_deopts(mut self, deopts: u32) -> Self {
        self.max_deopts = deopts;
        self
    }

    /// Checks that every setting is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_size == 0 {
            return Err(ConfigError::Zero("spesh log_size"));
        }
        if self.max_age == 0 {
            return Err(ConfigError::Zero("spesh max_age"));
        }
        if !(1..=100).contains(&self.plan_percentage) {
            return Err(ConfigError::OutOfRange {
                name: "spesh plan_percentage",
                value: self.plan_percentage as usize,
                min: 1,
                max: 100,
            });
        }
        if self.max_deopts == 0 {
            return Err(ConfigError::Zero("spesh max_deopts"));
        }
        if self.max_candidates == 0 {
            return Err(ConfigError::Zero("spesh max_candidates"));
        }
        if self.max_offset_entries == 0 {
            return Err(ConfigError::Zero("spesh max_offset_entries"));
        }
        Ok(())
    }
}
