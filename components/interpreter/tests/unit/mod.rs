//! Unit tests for the interpreter

mod common;
mod test_continuations;
mod test_gc;
mod test_objects;
mod test_spesh;
