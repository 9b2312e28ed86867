//! Validation Error Types

use serde_json::Value;
use thiserror::Error;

/// JSON value kinds, as reported in type errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Null,
    Boolean,
    Number,
    String,
    Array,
    Object,
}

impl ValueKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Boolean,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
        }
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Boolean => write!(f, "boolean"),
            Self::Number => write!(f, "number"),
            Self::String => write!(f, "string"),
            Self::Array => write!(f, "array"),
            Self::Object => write!(f, "object"),
        }
    }
}

/// Argument validation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Missing required argument: {name}")]
    MissingArgument { name: &'static str },

    #[error("Argument {name} must be a plain object, got {found}")]
    NotAnObject { name: &'static str, found: ValueKind },

    #[error("Argument {name} must not be an empty object")]
    EmptyObject { name: &'static str },

    #[error("Argument {name} has too many keys: expected at most {max}, got {found}")]
    TooManyKeys {
        name: &'static str,
        max: usize,
        found: usize,
    },

    #[error("Argument {name} has unknown key '{key}'")]
    UnknownKey { name: &'static str, key: String },

    #[error("Key '{key}' must be of type {expected}, got {found}")]
    WrongType {
        key: String,
        expected: ValueKind,
        found: ValueKind,
    },

    #[error("Key '{key}' has value {value}, expected one of: {allowed}")]
    NotAllowed {
        key: String,
        value: String,
        allowed: String,
    },

    #[error("Argument {name} is missing required key '{key}'")]
    MissingKey { name: &'static str, key: &'static str },

    #[error("Key '{key}' must be a non-empty string")]
    EmptyValue { key: String },

    #[error("Key '{key}' is invalid: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Address '{address}' is not valid for {currency}/{network}")]
    InvalidAddress {
        address: String,
        currency: String,
        network: String,
    },
}

impl ValidationError {
    /// Error name reported to the application
    pub fn error_name(&self) -> &'static str {
        match self {
            Self::NotAnObject { .. } | Self::WrongType { .. } => "TypeError",
            Self::NotAllowed { .. } => "RangeError",
            _ => "ValidationError",
        }
    }
}

/// Result type alias for validators
pub type ValidationResult<T = ()> = Result<T, ValidationError>;
