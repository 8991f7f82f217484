//! Unit tests for dispatch

mod common;
mod test_recorder;
