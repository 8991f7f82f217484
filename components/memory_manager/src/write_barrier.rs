//! Write barrier and remembered sets
//!
//! When a gen2 object is made to reference a nursery object, the owner must
//! be recorded so the next minor collection treats it as a root. Each
//! mutator thread records into its own remembered set; an owner is recorded
//! at most once, deduplicated by the `IN_REMEMBERED_SET` header flag which
//! the heap checks before calling [`RememberedSet::add`].

use core_types::ObjRef;

/// Gen2 owners that may reference nursery objects.
#[derive(Debug, Default)]
pub struct RememberedSet {
    owners: Vec<ObjRef>,
}

impl RememberedSet {
    /// Creates an empty remembered set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an owner.
    pub fn add(&mut self, owner: ObjRef) {
        self.owners.push(owner);
    }

    /// Removes and returns every recorded owner.
    pub fn take(&mut self) -> Vec<ObjRef> {
        std::mem::take(&mut self.owners)
    }

    /// Drops owners for which `keep` is false.
    pub fn retain(&mut self, keep: impl FnMut(&ObjRef) -> bool) {
        self.owners.retain(keep);
    }

    /// True if `owner` is recorded.
    pub fn contains(&self, owner: ObjRef) -> bool {
        self.owners.contains(&owner)
    }

    /// Recorded owners.
    pub fn iter(&self) -> impl Iterator<Item = &ObjRef> {
        self.owners.iter()
    }

    /// Number of recorded owners.
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// True if nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

/// Outcome of the barrier check for one reference store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierAction {
    /// Nothing to record
    None,
    /// The owner must be added to the mutating thread's remembered set
    Remember,
}

/// Decides whether storing a reference needs recording.
///
/// # Arguments
///
/// * `owner_in_gen2` - The object being written to lives in gen2
/// * `owner_remembered` - The owner already carries `IN_REMEMBERED_SET`
/// * `stored_in_nursery` - The stored value references a nursery object
pub fn barrier_action(
    owner_in_gen2: bool,
    owner_remembered: bool,
    stored_in_nursery: bool,
) -> BarrierAction {
    if owner_in_gen2 && stored_in_nursery && !owner_remembered {
        BarrierAction::Remember
    } else {
        BarrierAction::None
    }
}
