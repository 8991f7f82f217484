//! Unit tests for the specializer

mod common;
mod test_specialize;
mod test_worker;
