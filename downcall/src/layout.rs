//! Native memory layouts and function descriptors.
//!
//! A [`Layout`] is an immutable tree describing the native shape of a value:
//! a scalar of some C kind, a fixed-length sequence, or a struct/union group
//! that may carry explicit padding pseudo-members. Sizes are always in bits,
//! and a group's size is derived from its members, so the size invariant holds
//! by construction.

use std::fmt;

/// Logical C kind of a scalar layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Pointer,
}

impl ScalarKind {
    pub const ALL: [ScalarKind; 7] = [
        Self::Char,
        Self::Short,
        Self::Int,
        Self::Long,
        Self::Float,
        Self::Double,
        Self::Pointer,
    ];

    /// The one-letter symbol used in layout encodings.
    pub const fn symbol(self) -> char {
        match self {
            Self::Char => 'C',
            Self::Short => 'S',
            Self::Int => 'I',
            Self::Long => 'J',
            Self::Float => 'F',
            Self::Double => 'D',
            Self::Pointer => 'P',
        }
    }

    pub const fn from_symbol(symbol: char) -> Option<Self> {
        match symbol {
            'C' => Some(Self::Char),
            'S' => Some(Self::Short),
            'I' => Some(Self::Int),
            'J' => Some(Self::Long),
            'F' => Some(Self::Float),
            'D' => Some(Self::Double),
            'P' => Some(Self::Pointer),
            _ => None,
        }
    }

    pub const fn is_floating(self) -> bool {
        matches!(self, Self::Float | Self::Double)
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Char => "char",
            Self::Short => "short",
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
            Self::Pointer => "pointer",
        };
        f.write_str(name)
    }
}

/// One member of a group layout. Names are informational only and never
/// take part in encoding or caching.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub layout: Layout,
    pub name: Option<String>,
}

impl Member {
    pub fn named(name: impl Into<String>, layout: Layout) -> Self {
        Self {
            layout,
            name: Some(name.into()),
        }
    }

    pub fn unnamed(layout: Layout) -> Self {
        Self { layout, name: None }
    }

    pub fn padding(bits: u32) -> Self {
        Self::unnamed(Layout::Padding { bits })
    }

    pub fn is_padding(&self) -> bool {
        self.layout.is_padding()
    }
}

impl From<Layout> for Member {
    fn from(layout: Layout) -> Self {
        Self::unnamed(layout)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Layout {
    Scalar {
        kind: ScalarKind,
        bits: u32,
    },
    Sequence {
        element: Box<Layout>,
        count: usize,
    },
    Group {
        members: Vec<Member>,
        union: bool,
    },
    /// Explicit padding; only meaningful as a group member.
    Padding {
        bits: u32,
    },
}

impl Layout {
    pub fn scalar(kind: ScalarKind, bits: u32) -> Self {
        debug_assert!(bits > 0, "scalar layouts must have a positive size");
        Self::Scalar { kind, bits }
    }

    pub fn sequence(element: Layout, count: usize) -> Self {
        Self::Sequence {
            element: Box::new(element),
            count,
        }
    }

    pub fn structure<I, M>(members: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<Member>,
    {
        Self::Group {
            members: members.into_iter().map(Into::into).collect(),
            union: false,
        }
    }

    pub fn union<I, M>(members: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<Member>,
    {
        Self::Group {
            members: members.into_iter().map(Into::into).collect(),
            union: true,
        }
    }

    pub fn padding(bits: u32) -> Self {
        Self::Padding { bits }
    }

    pub fn is_padding(&self) -> bool {
        matches!(self, Self::Padding { .. })
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Self::Group { .. })
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, Self::Group { .. } | Self::Sequence { .. })
    }

    /// Declared size: members plus recorded padding (max for unions).
    pub fn bit_size(&self) -> u64 {
        match self {
            Self::Scalar { bits, .. } | Self::Padding { bits } => {
                u64::from(*bits)
            }
            Self::Sequence { element, count } => {
                element.bit_size() * (*count as u64)
            }
            Self::Group { members, union } => {
                let sizes = members.iter().map(|m| m.layout.bit_size());
                if *union {
                    sizes.max().unwrap_or(0)
                } else {
                    sizes.sum()
                }
            }
        }
    }

    /// Declared size in whole bytes, rounded up.
    pub fn byte_size(&self) -> usize {
        self.bit_size().div_ceil(8) as usize
    }

    /// Alignment the C compiler would give this layout, in bits.
    pub fn natural_align_bits(&self) -> u64 {
        match self {
            Self::Scalar { bits, .. } => u64::from(*bits).max(8),
            Self::Padding { .. } => 8,
            Self::Sequence { element, .. } => element.natural_align_bits(),
            Self::Group { members, .. } => members
                .iter()
                .filter(|m| !m.is_padding())
                .map(|m| m.layout.natural_align_bits())
                .max()
                .unwrap_or(8),
        }
    }

    /// Size the C compiler would give this layout when padding is inserted
    /// only where alignment demands it. Explicit padding members are ignored.
    pub fn natural_bit_size(&self) -> u64 {
        match self {
            Self::Scalar { bits, .. } => u64::from(*bits),
            Self::Padding { .. } => 0,
            Self::Sequence { element, count } => {
                element.natural_bit_size() * (*count as u64)
            }
            Self::Group { members, union } => {
                let align = self.natural_align_bits();
                let mut size = 0;
                for member in members.iter().filter(|m| !m.is_padding()) {
                    let layout = &member.layout;
                    if *union {
                        size = size.max(layout.natural_bit_size());
                    } else {
                        size = round_up(size, layout.natural_align_bits())
                            + layout.natural_bit_size();
                    }
                }
                round_up(size, align)
            }
        }
    }

    /// Non-padding members of a group; empty for every other layout.
    pub fn concrete_members(&self) -> impl Iterator<Item = &Member> {
        let members: &[Member] = match self {
            Self::Group { members, .. } => members,
            _ => &[],
        };
        members.iter().filter(|m| !m.is_padding())
    }
}

pub(crate) fn round_up(value: u64, align: u64) -> u64 {
    if align == 0 {
        return value;
    }
    value.div_ceil(align) * align
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar { kind, bits } => write!(f, "{kind}{bits}"),
            Self::Padding { bits } => write!(f, "pad{bits}"),
            Self::Sequence { element, count } => {
                write!(f, "[{count} x {element}]")
            }
            Self::Group { members, union } => {
                f.write_str(if *union { "union(" } else { "struct(" })?;
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", member.layout)?;
                    if let Some(name) = &member.name {
                        write!(f, " {name}")?;
                    }
                }
                f.write_str(")")
            }
        }
    }
}

/// Native shape of a function: argument layouts and an optional return
/// layout (`None` is `void`).
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDescriptor {
    return_layout: Option<Layout>,
    argument_layouts: Vec<Layout>,
}

impl FunctionDescriptor {
    pub fn of<I>(return_layout: Layout, arguments: I) -> Self
    where
        I: IntoIterator<Item = Layout>,
    {
        Self {
            return_layout: Some(return_layout),
            argument_layouts: arguments.into_iter().collect(),
        }
    }

    pub fn of_void<I>(arguments: I) -> Self
    where
        I: IntoIterator<Item = Layout>,
    {
        Self {
            return_layout: None,
            argument_layouts: arguments.into_iter().collect(),
        }
    }

    pub fn return_layout(&self) -> Option<&Layout> {
        self.return_layout.as_ref()
    }

    pub fn argument_layouts(&self) -> &[Layout] {
        &self.argument_layouts
    }

    /// Two descriptors are layout-equal when their encodings match; member
    /// names do not count.
    pub fn layout_eq(&self, other: &FunctionDescriptor) -> bool {
        crate::encoding::encode_descriptor(self)
            == crate::encoding::encode_descriptor(other)
    }
}
