//! Heap configuration.

use core_types::ConfigError;

/// Default per-thread nursery size: 4 MiB.
pub const DEFAULT_NURSERY_SIZE: usize = 4 * 1024 * 1024;
/// Default promoted volume that triggers a full collection: 20 MiB.
pub const DEFAULT_FULL_COLLECTION_THRESHOLD: usize = 20 * 1024 * 1024;

/// Tunables of the garbage-collected heap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapConfig {
    /// Bytes a thread may allocate before it wants a minor collection
    pub nursery_size: usize,
    /// Bytes promoted since the last full collection before another is due
    pub full_collection_threshold: usize,
    /// Survived collections before promotion
    pub promote_age: u8,
    /// Verify heap invariants after every collection
    pub verify_heap: bool,
}

impl Default for HeapConfig {
    fn default() -> Self {
        HeapConfig {
            nursery_size: DEFAULT_NURSERY_SIZE,
            full_collection_threshold: DEFAULT_FULL_COLLECTION_THRESHOLD,
            promote_age: 1,
            verify_heap: false,
        }
    }
}

impl HeapConfig {
    /// Sets the nursery size.
    pub fn with_nursery_size(mut self, bytes: usize) -> Self {
        self.nursery_size = bytes;
        self
    }

    /// Sets the full collection threshold.
    pub fn with_full_collection_threshold(mut self, bytes: usize) -> Self {
        self.full_collection_threshold = bytes;
        self
    }

    /// Sets the promotion age.
    pub fn with_promote_age(mut self, age: u8) -> Self {
        self.promote_age = age;
        self
    }

    /// Turns post-collection verification on or off.
    pub fn with_verify_heap(mut self, on: bool) -> Self {
        self.verify_heap = on;
        self
    }

    /// Checks that every setting is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nursery_size == 0 {
            return Err(ConfigError::Zero("nursery_size"));
        }
        if self.full_collection_threshold == 0 {
            return Err(ConfigError::Zero("full_collection_threshold"));
        }
        if !(1..=15).contains(&self.promote_age) {
            return Err(ConfigError::OutOfRange {
                name: "promote_age",
                value: self.promote_age as usize,
                min: 1,
                max: 15,
            });
        }
        Ok(())
    }
}
