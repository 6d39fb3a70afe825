//! The managed side of a binding: the value types a caller expects.

use std::fmt;

use crate::layout::{Layout, ScalarKind};
use crate::target::Target;

/// Logical type of one argument or of the return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalType {
    Void,
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    /// Raw native address.
    Pointer,
    /// Opaque handle to a struct or union passed by value.
    Aggregate,
    /// Trailing `va_list`; only valid as the last argument.
    VaList,
}

impl LogicalType {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Bool => "bool",
            Self::I8 => "i8",
            Self::U8 => "u8",
            Self::I16 => "i16",
            Self::U16 => "u16",
            Self::I32 => "i32",
            Self::U32 => "u32",
            Self::I64 => "i64",
            Self::U64 => "u64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Pointer => "pointer",
            Self::Aggregate => "aggregate",
            Self::VaList => "va_list",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let ty = match name.to_ascii_lowercase().as_str() {
            "void" => Self::Void,
            "bool" | "boolean" => Self::Bool,
            "i8" | "byte" => Self::I8,
            "u8" => Self::U8,
            "i16" | "short" => Self::I16,
            "u16" => Self::U16,
            "i32" | "int" => Self::I32,
            "u32" => Self::U32,
            "i64" | "long" => Self::I64,
            "u64" => Self::U64,
            "f32" | "float" => Self::F32,
            "f64" | "double" => Self::F64,
            "pointer" | "ptr" => Self::Pointer,
            "aggregate" | "struct" => Self::Aggregate,
            "va_list" | "valist" => Self::VaList,
            _ => return None,
        };
        Some(ty)
    }

    /// Scalar bit sizes this type may occupy on `target`. Empty for types
    /// that never bind to a scalar.
    pub fn allowed_bits(self, target: &Target) -> Vec<u32> {
        match self {
            Self::Void | Self::Aggregate => Vec::new(),
            Self::Bool => vec![8, 32],
            Self::I8 | Self::U8 => vec![8],
            Self::I16 | Self::U16 => vec![16],
            Self::I32 | Self::U32 | Self::F32 => vec![32],
            Self::I64 | Self::U64 | Self::F64 => vec![64],
            Self::Pointer | Self::VaList => vec![target.pointer_bits],
        }
    }

    /// Whether a scalar layout of `kind` can carry this type. Sizes are
    /// checked separately.
    pub fn admits_kind(self, kind: ScalarKind) -> bool {
        use ScalarKind as K;
        match self {
            Self::Void | Self::Aggregate => false,
            Self::Bool => matches!(kind, K::Char | K::Int),
            Self::I8 | Self::U8 => kind == K::Char,
            Self::I16 | Self::U16 => kind == K::Short,
            Self::I32 | Self::U32 => matches!(kind, K::Int | K::Long),
            Self::I64 | Self::U64 => kind == K::Long,
            Self::F32 => kind == K::Float,
            Self::F64 => kind == K::Double,
            Self::Pointer | Self::VaList => kind == K::Pointer,
        }
    }

    /// The C layout a value of this type is usually passed as. `None` for
    /// `void` and for aggregates, whose layout has to be spelled out.
    pub fn default_layout(self, target: &Target) -> Option<Layout> {
        let layout = match self {
            Self::Void | Self::Aggregate => return None,
            Self::I8 | Self::U8 => target.c_char(),
            Self::I16 | Self::U16 => target.c_short(),
            Self::Bool | Self::I32 | Self::U32 => target.c_int(),
            Self::I64 | Self::U64 => target.c_long_long(),
            Self::F32 => target.c_float(),
            Self::F64 => target.c_double(),
            Self::Pointer => target.c_pointer(),
            Self::VaList => target.c_va_list(),
        };
        Some(layout)
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered argument types plus a return type, as the caller sees them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    pub return_type: LogicalType,
    pub argument_types: Vec<LogicalType>,
}

impl Signature {
    pub fn new<I>(return_type: LogicalType, arguments: I) -> Self
    where
        I: IntoIterator<Item = LogicalType>,
    {
        Self {
            return_type,
            argument_types: arguments.into_iter().collect(),
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, ty) in self.argument_types.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{ty}")?;
        }
        write!(f, ") -> {}", self.return_type)
    }
}
