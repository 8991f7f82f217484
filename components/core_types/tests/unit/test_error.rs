//! Unit tests for VmError and ErrorKind

use core_types::{ErrorKind, VmError, VmResult};

#[test]
fn test_unknown_dispatcher_message() {
    let err = VmError::unknown_dispatcher("lang-call");
    assert_eq!(err.kind, ErrorKind::UnknownDispatcher);
    assert_eq!(err.message, "No dispatcher registered with ID 'lang-call'");
}

#[test]
fn test_errors_compare_by_kind_and_message() {
    let a = VmError::adhoc(ErrorKind::Arity, "expected 2 arguments");
    let b = VmError::adhoc(ErrorKind::Arity, "expected 2 arguments");
    let c = VmError::adhoc(ErrorKind::Bounds, "expected 2 arguments");
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn test_error_is_std_error() {
    fn takes_error(e: &dyn std::error::Error) -> String {
        e.to_string()
    }
    let err = VmError::type_check("expected an integer");
    assert_eq!(takes_error(&err), "expected an integer");
}

#[test]
fn test_question_mark_chains() {
    fn step(fail: bool) -> VmResult<u32> {
        if fail {
            Err(VmError::adhoc(ErrorKind::Continuation, "No matching continuation reset found"))
        } else {
            Ok(1)
        }
    }
    fn run() -> VmResult<u32> {
        Ok(step(false)? + step(true)?)
    }
    assert_eq!(run().unwrap_err().kind, ErrorKind::Continuation);
}
