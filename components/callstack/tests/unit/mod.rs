//! Unit tests for callstack

mod test_stack;
