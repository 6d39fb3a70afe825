use std::fmt;

use crate::signature::LogicalType;

/// Where in a signature a bind error was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Position {
    Argument(usize),
    Return,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Argument(index) => write!(f, "argument {index}"),
            Self::Return => f.write_str("return value"),
        }
    }
}

/// Errors raised while binding. Layouts are reported by their encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    NullAddress,
    ArityMismatch {
        expected: usize,
        actual: usize,
    },
    VoidMismatch {
        position: Position,
        ty: LogicalType,
        layout: Option<String>,
    },
    AggregateLayoutExpected {
        position: Position,
        layout: String,
    },
    SizeMismatch {
        position: Position,
        ty: LogicalType,
        bits: u32,
        allowed: Vec<u32>,
    },
    KindMismatch {
        position: Position,
        ty: LogicalType,
        layout: String,
    },
    MisplacedVariadic {
        position: Position,
    },
    DescriptorBuildFailed {
        key: String,
        reason: String,
    },
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NullAddress => f.write_str("function address is null"),
            Self::ArityMismatch { expected, actual } => write!(
                f,
                "arity mismatch: descriptor has {expected} arguments, \
                 signature has {actual}"
            ),
            Self::VoidMismatch {
                position,
                ty,
                layout: Some(layout),
            } => write!(
                f,
                "{position}: {ty} cannot bind to layout {layout}, \
                 expected no layout"
            ),
            Self::VoidMismatch {
                position,
                ty,
                layout: None,
            } => write!(f, "{position}: {ty} has no layout to bind to"),
            Self::AggregateLayoutExpected { position, layout } => write!(
                f,
                "{position}: aggregate requires a group layout, got {layout}"
            ),
            Self::SizeMismatch {
                position,
                ty,
                bits,
                allowed,
            } => write!(
                f,
                "{position}: {ty} cannot occupy a {bits}-bit layout \
                 (allowed: {allowed:?})"
            ),
            Self::KindMismatch {
                position,
                ty,
                layout,
            } => {
                write!(f, "{position}: {ty} is not compatible with {layout}")
            }
            Self::MisplacedVariadic { position } => write!(
                f,
                "{position}: va_list is only allowed as the last argument"
            ),
            Self::DescriptorBuildFailed { key, reason } => {
                write!(f, "cannot build call descriptor {key}: {reason}")
            }
        }
    }
}

impl std::error::Error for BindError {}

/// Errors raised by a bound adapter before the native call is issued, when
/// the supplied values do not match the bound signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    ArgumentCount {
        expected: usize,
        actual: usize,
    },
    ArgumentType {
        index: usize,
        expected: LogicalType,
        got: LogicalType,
    },
    AggregateTooSmall {
        index: usize,
        required: usize,
        actual: usize,
    },
    ReturnStorageTooSmall {
        required: usize,
        actual: usize,
    },
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ArgumentCount { expected, actual } => {
                write!(f, "expected {expected} arguments, got {actual}")
            }
            Self::ArgumentType {
                index,
                expected,
                got,
            } => write!(f, "argument {index}: expected {expected}, got {got}"),
            Self::AggregateTooSmall {
                index,
                required,
                actual,
            } => write!(
                f,
                "argument {index}: aggregate needs {required} bytes, \
                 has {actual}"
            ),
            Self::ReturnStorageTooSmall { required, actual } => write!(
                f,
                "return value needs {required} bytes of storage, has {actual}"
            ),
        }
    }
}

impl std::error::Error for CallError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryError {
    InvalidName { name: String },
    OpenFailed { path: String, message: String },
    SymbolNotFound { name: String },
    Unsupported,
}

impl fmt::Display for LibraryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidName { name } => {
                write!(f, "name contains an interior nul byte: {name:?}")
            }
            Self::OpenFailed { path, message } => {
                write!(f, "cannot open library {path}: {message}")
            }
            Self::SymbolNotFound { name } => {
                write!(f, "symbol not found: {name}")
            }
            Self::Unsupported => {
                f.write_str("library loading not supported on this platform")
            }
        }
    }
}

impl std::error::Error for LibraryError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_detail() {
        let err = BindError::SizeMismatch {
            position: Position::Argument(1),
            ty: LogicalType::I32,
            bits: 64,
            allowed: vec![32],
        };
        assert_eq!(
            err.to_string(),
            "argument 1: i32 cannot occupy a 64-bit layout (allowed: [32])"
        );

        let err = BindError::VoidMismatch {
            position: Position::Return,
            ty: LogicalType::I32,
            layout: None,
        };
        assert_eq!(err.to_string(), "return value: i32 has no layout to bind to");

        let err = CallError::ArgumentType {
            index: 0,
            expected: LogicalType::F64,
            got: LogicalType::I32,
        };
        assert_eq!(err.to_string(), "argument 0: expected f64, got i32");
    }
}
