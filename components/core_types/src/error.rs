//! Error taxonomy of the VM.
//!
//! Two tiers exist. Catchable ("adhoc") errors are [`VmError`] values that
//! propagate through `Result` and surface as language-level exceptions.
//! Invariant violations are not errors at all: they end the process via
//! [`vm_panic`].

use thiserror::Error;

/// The kind of a catchable VM error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Instance data requested from a type object
    TypeObject,
    /// Value of the wrong type or kind for an operation
    TypeCheck,
    /// REPR-level misuse (unsupported operation, bad slot)
    Repr,
    /// Composition missing or repeated
    Compose,
    /// Lookup of a dispatcher id nobody registered
    UnknownDispatcher,
    /// Registration of an id with a different signature
    DispatcherConflict,
    /// A dispatch callback broke the recorder protocol
    DispatchProtocol,
    /// Continuation misuse (no reset, already invoked)
    Continuation,
    /// Malformed guard tree construction
    GuardTree,
    /// Index out of range
    Bounds,
    /// Wrong number or kind of arguments
    Arity,
    /// Bytecode that fails validation
    Bytecode,
    /// Invalid configuration
    Config,
}

/// A catchable VM error.
///
/// # Examples
///
/// ```
/// use core_types::{ErrorKind, VmError};
///
/// let err = VmError::unknown_dispatcher("plus");
/// assert_eq!(err.kind, ErrorKind::UnknownDispatcher);
/// assert_eq!(err.to_string(), "No dispatcher registered with ID 'plus'");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct VmError {
    /// Classification used by handlers
    pub kind: ErrorKind,
    /// Human-readable message
    pub message: String,
}

/// Result alias used across the VM.
pub type VmResult<T> = Result<T, VmError>;

impl VmError {
    /// Creates an adhoc error of the given kind.
    pub fn adhoc(kind: ErrorKind, message: impl Into<String>) -> Self {
        VmError {
            kind,
            message: message.into(),
        }
    }

    /// An operation needed a concrete instance but got a type object.
    pub fn type_object(op: &str, type_name: &str) -> Self {
        Self::adhoc(
            ErrorKind::TypeObject,
            format!("Cannot {} a type object (of type {})", op, type_name),
        )
    }

    /// A dispatcher id that is not in the registry.
    pub fn unknown_dispatcher(id: &str) -> Self {
        Self::adhoc(
            ErrorKind::UnknownDispatcher,
            format!("No dispatcher registered with ID '{}'", id),
        )
    }

    /// A value had the wrong type for an operation.
    pub fn type_check(message: impl Into<String>) -> Self {
        Self::adhoc(ErrorKind::TypeCheck, message)
    }
}

/// An invalid configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A size or count that must be positive was zero
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    /// A value outside its allowed range
    #[error("{name} must be between {min} and {max}, got {value}")]
    OutOfRange {
        /// Setting name
        name: &'static str,
        /// Value supplied
        value: usize,
        /// Smallest allowed value
        min: usize,
        /// Largest allowed value
        max: usize,
    },
    /// An environment switch that could not be parsed
    #[error("invalid value '{value}' for {var}")]
    BadEnv {
        /// Environment variable name
        var: &'static str,
        /// Raw value found
        value: String,
    },
}

impl From<ConfigError> for VmError {
    fn from(err: ConfigError) -> Self {
        VmError::adhoc(ErrorKind::Config, err.to_string())
    }
}

/// Exit code used for GC structural inconsistencies.
pub const PANIC_GC: i32 = 2;
/// Exit code used for call stack and continuation corruption.
pub const PANIC_STACK: i32 = 3;
/// Exit code used for allocation failure.
pub const PANIC_ALLOC: i32 = 4;

/// Terminates the process after an invariant violation.
///
/// Never caught by language-level handlers.
pub fn vm_panic(code: i32, message: &str) -> ! {
    log::error!("VM panic: {}", message);
    eprintln!("VM panic: {}", message);
    std::process::exit(code)
}
