//! Compact, name-free textual encoding of layouts, used as cache keys.
//!
//! Grammar:
//!
//! ```text
//! scalar   := 'C' | 'S' | 'I' | 'J' | 'F' | 'D' | 'P'
//! sequence := <count> ':' layout
//! struct   := '#' <members> '[' layout* padding? ']'
//! union    := '#' <members> 'U' '[' layout* padding? ']'
//! padding  := 'x' <bits>
//! ```
//!
//! The member count excludes padding. Trailing padding is only written for
//! the outermost group, and only when the declared size is larger than the
//! size C alignment rules would give the members on their own. Every
//! production is self-delimiting, so encodings concatenate without
//! separators.

use std::fmt;

use crate::layout::{FunctionDescriptor, Layout};
use crate::signature::LogicalType;

/// Encoding used for an absent return layout.
pub const VOID: &str = "void";

pub fn encode(layout: &Layout) -> String {
    encode_layout(layout, true)
}

fn encode_layout(layout: &Layout, outermost: bool) -> String {
    match layout {
        Layout::Scalar { kind, .. } => kind.symbol().to_string(),
        Layout::Padding { bits } => format!("x{bits}"),
        Layout::Sequence { element, count } => {
            format!("{count}:{}", encode_layout(element, false))
        }
        Layout::Group { union, .. } => {
            let members: String = layout
                .concrete_members()
                .map(|member| encode_layout(&member.layout, false))
                .collect();
            let count = layout.concrete_members().count();
            let padding = if outermost {
                trailing_padding_bits(layout)
            } else {
                0
            };
            let tag = if *union { "U" } else { "" };
            if padding > 0 {
                format!("#{count}{tag}[{members}x{padding}]")
            } else {
                format!("#{count}{tag}[{members}]")
            }
        }
    }
}

/// Padding, in bits, that the declared size of a group carries beyond the
/// natural size of its members.
pub fn trailing_padding_bits(layout: &Layout) -> u64 {
    if !layout.is_group() {
        return 0;
    }
    layout.bit_size().saturating_sub(layout.natural_bit_size())
}

/// Encoding prefixed with the byte size of the layout, e.g. `12#3[III]`
/// or `4I`.
pub fn encode_sized(layout: &Layout) -> String {
    format!("{}{}", layout.byte_size(), encode(layout))
}

pub fn encode_return(layout: Option<&Layout>) -> String {
    layout.map_or_else(|| VOID.to_string(), encode)
}

/// Layout-only encoding of a whole descriptor: `<arguments>-><return>`.
pub fn encode_descriptor(descriptor: &FunctionDescriptor) -> String {
    let arguments = ArgumentKey::new(descriptor.argument_layouts());
    format!(
        "{}->{}",
        arguments.as_str(),
        encode_return(descriptor.return_layout())
    )
}

/// Key of the argument type table: the concatenated argument encodings,
/// independent of the return.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArgumentKey(String);

impl ArgumentKey {
    pub fn new<'a, I>(layouts: I) -> Self
    where
        I: IntoIterator<Item = &'a Layout>,
    {
        Self(layouts.into_iter().map(encode).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArgumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key of a prepared call descriptor. Besides every layout it names the
/// logical return kind, so signatures whose layouts alias by bit width
/// (`(int,int)->int` and `(bool,bool)->bool` over `C_INT`) never share a
/// descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorKey(String);

impl DescriptorKey {
    pub fn new(
        arguments: &ArgumentKey,
        return_layout: Option<&Layout>,
        return_type: LogicalType,
    ) -> Self {
        Self(format!(
            "{arguments}->{}@{}",
            encode_return(return_layout),
            return_type.name()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DescriptorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
