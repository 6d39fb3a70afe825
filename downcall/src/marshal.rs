//! Conversion between managed values and raw native words.
//!
//! Each argument position gets an [`ArgFilter`] and the return position a
//! [`ReturnFilter`]; a [`Pipeline`] is the ordered set of both, built once
//! per binding from the validated shape.

use std::fmt;

use crate::error::CallError;
use crate::signature::LogicalType;
use crate::validate::ValidatedShape;

pub use crate::native::RawWord;

/// A managed value crossing the native boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Void,
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Pointer(usize),
    VaList(usize),
    Aggregate(Aggregate),
}

impl Value {
    pub fn logical_type(&self) -> LogicalType {
        match self {
            Self::Void => LogicalType::Void,
            Self::Bool(_) => LogicalType::Bool,
            Self::I8(_) => LogicalType::I8,
            Self::U8(_) => LogicalType::U8,
            Self::I16(_) => LogicalType::I16,
            Self::U16(_) => LogicalType::U16,
            Self::I32(_) => LogicalType::I32,
            Self::U32(_) => LogicalType::U32,
            Self::I64(_) => LogicalType::I64,
            Self::U64(_) => LogicalType::U64,
            Self::F32(_) => LogicalType::F32,
            Self::F64(_) => LogicalType::F64,
            Self::Pointer(_) => LogicalType::Pointer,
            Self::VaList(_) => LogicalType::VaList,
            Self::Aggregate(_) => LogicalType::Aggregate,
        }
    }

    /// Parses `text` as a value of `ty`. Aggregates cannot be written
    /// inline.
    pub fn parse(ty: LogicalType, text: &str) -> Option<Self> {
        let value = match ty {
            LogicalType::Void => Self::Void,
            LogicalType::Bool => match text {
                "true" | "1" => Self::Bool(true),
                "false" | "0" => Self::Bool(false),
                _ => return None,
            },
            LogicalType::I8 => Self::I8(text.parse().ok()?),
            LogicalType::U8 => Self::U8(text.parse().ok()?),
            LogicalType::I16 => Self::I16(text.parse().ok()?),
            LogicalType::U16 => Self::U16(text.parse().ok()?),
            LogicalType::I32 => Self::I32(text.parse().ok()?),
            LogicalType::U32 => Self::U32(text.parse().ok()?),
            LogicalType::I64 => Self::I64(text.parse().ok()?),
            LogicalType::U64 => Self::U64(text.parse().ok()?),
            LogicalType::F32 => Self::F32(text.parse().ok()?),
            LogicalType::F64 => Self::F64(text.parse().ok()?),
            LogicalType::Pointer => Self::Pointer(parse_address(text)?),
            LogicalType::VaList => Self::VaList(parse_address(text)?),
            LogicalType::Aggregate => return None,
        };
        Some(value)
    }
}

fn parse_address(text: &str) -> Option<usize> {
    match text.strip_prefix("0x") {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => f.write_str("void"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::I8(v) => write!(f, "{v}"),
            Self::U8(v) => write!(f, "{v}"),
            Self::I16(v) => write!(f, "{v}"),
            Self::U16(v) => write!(f, "{v}"),
            Self::I32(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::U64(v) => write!(f, "{v}"),
            Self::F32(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v}"),
            Self::Pointer(v) | Self::VaList(v) => write!(f, "{v:#x}"),
            Self::Aggregate(v) => write!(f, "{v:?}"),
        }
    }
}

/// Owned, 8-byte aligned bytes of a struct or union passed by value.
#[derive(Clone, PartialEq, Eq)]
pub struct Aggregate {
    words: Box<[u64]>,
    len: usize,
}

macro_rules! aggregate_access {
    ($read:ident, $write:ident, $ty:ty) => {
        pub fn $read(&self, offset: usize) -> Option<$ty> {
            let end = offset.checked_add(size_of::<$ty>())?;
            let bytes = self.as_bytes().get(offset..end)?;
            Some(<$ty>::from_ne_bytes(bytes.try_into().ok()?))
        }

        pub fn $write(&mut self, offset: usize, value: $ty) -> Option<()> {
            let end = offset.checked_add(size_of::<$ty>())?;
            let bytes = self.as_bytes_mut().get_mut(offset..end)?;
            bytes.copy_from_slice(&value.to_ne_bytes());
            Some(())
        }
    };
}

impl Aggregate {
    pub fn zeroed(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(8)].into_boxed_slice(),
            len,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut aggregate = Self::zeroed(bytes.len());
        aggregate.as_bytes_mut().copy_from_slice(bytes);
        aggregate
    }

    /// Copies `len` bytes starting at `address`.
    ///
    /// # Safety
    ///
    /// `address` must be valid for reads of `len` bytes.
    pub unsafe fn copy_from(address: usize, len: usize) -> Self {
        let mut aggregate = Self::zeroed(len);
        // SAFETY: caller guarantees the source range; the destination is a
        // fresh buffer of at least `len` bytes
        unsafe {
            std::ptr::copy_nonoverlapping(
                address as *const u8,
                aggregate.as_bytes_mut().as_mut_ptr(),
                len,
            );
        }
        aggregate
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.words.as_ptr().cast()
    }

    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: words holds at least len initialised bytes
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.len) }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: words holds at least len initialised bytes
        unsafe {
            std::slice::from_raw_parts_mut(
                self.words.as_mut_ptr().cast(),
                self.len,
            )
        }
    }

    aggregate_access!(read_u8, write_u8, u8);
    aggregate_access!(read_i8, write_i8, i8);
    aggregate_access!(read_u16, write_u16, u16);
    aggregate_access!(read_i16, write_i16, i16);
    aggregate_access!(read_u32, write_u32, u32);
    aggregate_access!(read_i32, write_i32, i32);
    aggregate_access!(read_u64, write_u64, u64);
    aggregate_access!(read_i64, write_i64, i64);
    aggregate_access!(read_f32, write_f32, f32);
    aggregate_access!(read_f64, write_f64, f64);
}

impl fmt::Debug for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Aggregate[{}](", self.len)?;
        for (i, byte) in self.as_bytes().iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{byte:02x}")?;
        }
        f.write_str(")")
    }
}

/// Lowers one managed argument into its raw word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgFilter {
    Scalar(LogicalType),
    /// The word is the address of the aggregate's bytes, which must stay
    /// alive until the call returns.
    Aggregate { size: usize },
}

impl ArgFilter {
    pub fn logical_type(self) -> LogicalType {
        match self {
            Self::Scalar(ty) => ty,
            Self::Aggregate { .. } => LogicalType::Aggregate,
        }
    }

    /// Narrower values are zero-extended from their native bit pattern; the
    /// descriptor narrows the word again when it fills the argument slot.
    pub fn lower(
        self,
        index: usize,
        value: &Value,
    ) -> Result<RawWord, CallError> {
        let word = match (self, value) {
            (Self::Scalar(LogicalType::Bool), Value::Bool(v)) => {
                u64::from(*v)
            }
            (Self::Scalar(LogicalType::I8), Value::I8(v)) => {
                u64::from(*v as u8)
            }
            (Self::Scalar(LogicalType::U8), Value::U8(v)) => u64::from(*v),
            (Self::Scalar(LogicalType::I16), Value::I16(v)) => {
                u64::from(*v as u16)
            }
            (Self::Scalar(LogicalType::U16), Value::U16(v)) => u64::from(*v),
            (Self::Scalar(LogicalType::I32), Value::I32(v)) => {
                u64::from(*v as u32)
            }
            (Self::Scalar(LogicalType::U32), Value::U32(v)) => u64::from(*v),
            (Self::Scalar(LogicalType::I64), Value::I64(v)) => *v as u64,
            (Self::Scalar(LogicalType::U64), Value::U64(v)) => *v,
            (Self::Scalar(LogicalType::F32), Value::F32(v)) => {
                u64::from(v.to_bits())
            }
            (Self::Scalar(LogicalType::F64), Value::F64(v)) => v.to_bits(),
            (Self::Scalar(LogicalType::Pointer), Value::Pointer(v))
            | (Self::Scalar(LogicalType::VaList), Value::VaList(v)) => {
                *v as u64
            }
            (Self::Aggregate { size }, Value::Aggregate(aggregate)) => {
                if aggregate.len() < size {
                    return Err(CallError::AggregateTooSmall {
                        index,
                        required: size,
                        actual: aggregate.len(),
                    });
                }
                aggregate.as_ptr() as usize as u64
            }
            _ => {
                return Err(CallError::ArgumentType {
                    index,
                    expected: self.logical_type(),
                    got: value.logical_type(),
                });
            }
        };
        Ok(word)
    }
}

/// Lifts the raw return word back into a managed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnFilter {
    Scalar(LogicalType),
    /// The word is the address of the returned bytes.
    Aggregate { size: usize },
}

impl ReturnFilter {
    /// # Safety
    ///
    /// For aggregates, `word` must address at least `size` readable bytes.
    pub unsafe fn lift(self, word: RawWord) -> Value {
        match self {
            Self::Aggregate { size } => {
                // SAFETY: guaranteed by the caller
                Value::Aggregate(unsafe {
                    Aggregate::copy_from(word as usize, size)
                })
            }
            Self::Scalar(ty) => match ty {
                LogicalType::Void => Value::Void,
                LogicalType::Bool => Value::Bool(word != 0),
                LogicalType::I8 => Value::I8(word as u8 as i8),
                LogicalType::U8 => Value::U8(word as u8),
                LogicalType::I16 => Value::I16(word as u16 as i16),
                LogicalType::U16 => Value::U16(word as u16),
                LogicalType::I32 => Value::I32(word as u32 as i32),
                LogicalType::U32 => Value::U32(word as u32),
                LogicalType::I64 => Value::I64(word as i64),
                LogicalType::U64 => Value::U64(word),
                LogicalType::F32 => Value::F32(f32::from_bits(word as u32)),
                LogicalType::F64 => Value::F64(f64::from_bits(word)),
                LogicalType::Pointer => Value::Pointer(word as usize),
                LogicalType::VaList => Value::VaList(word as usize),
                // aggregates always get the sized filter
                LogicalType::Aggregate => Value::Pointer(word as usize),
            },
        }
    }
}

/// Per-position filters of one binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub arguments: Vec<ArgFilter>,
    pub ret: ReturnFilter,
}

impl Pipeline {
    pub fn build(shape: &ValidatedShape<'_>) -> Self {
        let arguments = shape
            .argument_types
            .iter()
            .zip(&shape.argument_layouts)
            .map(|(ty, layout)| match ty {
                LogicalType::Aggregate => ArgFilter::Aggregate {
                    size: layout.byte_size(),
                },
                _ => ArgFilter::Scalar(*ty),
            })
            .collect();
        let ret = match (shape.return_type, shape.return_layout) {
            (LogicalType::Aggregate, Some(layout)) => ReturnFilter::Aggregate {
                size: layout.byte_size(),
            },
            (ty, _) => ReturnFilter::Scalar(ty),
        };
        Self { arguments, ret }
    }

    pub fn lower(&self, values: &[Value]) -> Result<Vec<RawWord>, CallError> {
        if values.len() != self.arguments.len() {
            return Err(CallError::ArgumentCount {
                expected: self.arguments.len(),
                actual: values.len(),
            });
        }
        self.arguments
            .iter()
            .zip(values)
            .enumerate()
            .map(|(index, (filter, value))| filter.lower(index, value))
            .collect()
    }

    /// # Safety
    ///
    /// See [`ReturnFilter::lift`].
    pub unsafe fn lift(&self, word: RawWord) -> Value {
        // SAFETY: forwarded to the caller
        unsafe { self.ret.lift(word) }
    }
}
