//! Unit tests for memory_manager

mod common;
mod test_collection;
mod test_orchestrate;
