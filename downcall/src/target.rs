//! Primitive width rules of the platform a call is bound for.

use crate::layout::{Layout, ScalarKind};

/// Data model of a target platform. Only the widths that differ between the
/// common C data models are recorded; `char`, `short`, `int`, `float` and
/// `double` are fixed at 8, 16, 32, 32 and 64 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Target {
    pub pointer_bits: u32,
    pub long_bits: u32,
}

impl Target {
    /// 64-bit Unix: 64-bit `long` and pointers.
    pub const fn lp64() -> Self {
        Self {
            pointer_bits: 64,
            long_bits: 64,
        }
    }

    /// 64-bit Windows: 32-bit `long`, 64-bit `long long` and pointers.
    pub const fn llp64() -> Self {
        Self {
            pointer_bits: 64,
            long_bits: 32,
        }
    }

    /// 32-bit platforms.
    pub const fn ilp32() -> Self {
        Self {
            pointer_bits: 32,
            long_bits: 32,
        }
    }

    #[cfg(all(target_pointer_width = "64", not(windows)))]
    pub const fn host() -> Self {
        Self::lp64()
    }

    #[cfg(all(target_pointer_width = "64", windows))]
    pub const fn host() -> Self {
        Self::llp64()
    }

    #[cfg(not(target_pointer_width = "64"))]
    pub const fn host() -> Self {
        Self::ilp32()
    }

    /// Bit sizes a scalar of `kind` may have on this target. `Long` also
    /// covers `long long`, so it admits 64 bits even where `long` is 32.
    pub fn scalar_bits(&self, kind: ScalarKind) -> Vec<u32> {
        match kind {
            ScalarKind::Char => vec![8],
            ScalarKind::Short => vec![16],
            ScalarKind::Int | ScalarKind::Float => vec![32],
            ScalarKind::Double => vec![64],
            ScalarKind::Pointer => vec![self.pointer_bits],
            ScalarKind::Long if self.long_bits == 64 => vec![64],
            ScalarKind::Long => vec![self.long_bits, 64],
        }
    }

    pub fn is_valid_scalar(&self, kind: ScalarKind, bits: u32) -> bool {
        self.scalar_bits(kind).contains(&bits)
    }

    pub fn c_char(&self) -> Layout {
        Layout::scalar(ScalarKind::Char, 8)
    }

    pub fn c_short(&self) -> Layout {
        Layout::scalar(ScalarKind::Short, 16)
    }

    pub fn c_int(&self) -> Layout {
        Layout::scalar(ScalarKind::Int, 32)
    }

    pub fn c_long(&self) -> Layout {
        Layout::scalar(ScalarKind::Long, self.long_bits)
    }

    pub fn c_long_long(&self) -> Layout {
        Layout::scalar(ScalarKind::Long, 64)
    }

    pub fn c_float(&self) -> Layout {
        Layout::scalar(ScalarKind::Float, 32)
    }

    pub fn c_double(&self) -> Layout {
        Layout::scalar(ScalarKind::Double, 64)
    }

    pub fn c_pointer(&self) -> Layout {
        Layout::scalar(ScalarKind::Pointer, self.pointer_bits)
    }

    /// A `va_list` passed by value decays to a pointer on every supported
    /// calling convention.
    pub fn c_va_list(&self) -> Layout {
        self.c_pointer()
    }
}

impl Default for Target {
    fn default() -> Self {
        Self::host()
    }
}
