//! When a routine is hot enough to specialize.

/// Hits a routine of `instructions` instructions needs before it is
/// planned. Small routines are cheap to interpret, so they wait longer.
pub fn threshold(instructions: usize, nodelay: bool) -> u64 {
    if nodelay {
        1
    } else if instructions < 32 {
        200
    } else if instructions < 256 {
        150
    } else {
        100
    }
}
