use std::fmt;

use crate::ClassId;

/// Errors surfaced to the language layer. Invariant violations inside the
/// variable tables are not represented here, they panic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    NameError { name: String, message: &'static str },
    FrozenError { class: String },
    NotDefined { name: String },
    UnknownClass { id: ClassId },
    SuperclassMismatch { class: String },
    TypeError { expected: &'static str, got: String },
}

pub type Result<T, E = RuntimeError> = std::result::Result<T, E>;

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NameError { name, message } => write!(f, "`{name}' {message}"),
            Self::FrozenError { class } => {
                write!(f, "can't modify frozen {class}")
            }
            Self::NotDefined { name } => {
                write!(f, "uninitialized constant {name}")
            }
            Self::UnknownClass { id } => write!(f, "unknown class id {}", id.0),
            Self::SuperclassMismatch { class } => {
                write!(f, "superclass mismatch for class {class}")
            }
            Self::TypeError { expected, got } => {
                write!(f, "expected {expected}, got {got}")
            }
        }
    }
}

impl std::error::Error for RuntimeError {}
