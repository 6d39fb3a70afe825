//! Structural compatibility between a managed signature and a native
//! function descriptor.

use crate::encoding::{ArgumentKey, DescriptorKey, encode};
use crate::error::{BindError, Position};
use crate::layout::{FunctionDescriptor, Layout};
use crate::signature::{LogicalType, Signature};
use crate::target::Target;

/// A signature and descriptor that passed validation, position by position.
#[derive(Debug, Clone)]
pub struct ValidatedShape<'a> {
    pub argument_layouts: Vec<&'a Layout>,
    pub argument_types: Vec<LogicalType>,
    pub return_layout: Option<&'a Layout>,
    pub return_type: LogicalType,
}

impl ValidatedShape<'_> {
    pub fn argument_key(&self) -> ArgumentKey {
        ArgumentKey::new(self.argument_layouts.iter().copied())
    }

    pub fn descriptor_key(&self, arguments: &ArgumentKey) -> DescriptorKey {
        DescriptorKey::new(arguments, self.return_layout, self.return_type)
    }
}

pub fn validate<'a>(
    target: &Target,
    signature: &Signature,
    descriptor: &'a FunctionDescriptor,
) -> Result<ValidatedShape<'a>, BindError> {
    let layouts = descriptor.argument_layouts();
    let types = &signature.argument_types;
    if layouts.len() != types.len() {
        return Err(BindError::ArityMismatch {
            expected: layouts.len(),
            actual: types.len(),
        });
    }

    let last = types.len().checked_sub(1);
    for (index, ty) in types.iter().enumerate() {
        if *ty == LogicalType::VaList && Some(index) != last {
            return Err(BindError::MisplacedVariadic {
                position: Position::Argument(index),
            });
        }
    }
    if signature.return_type == LogicalType::VaList {
        return Err(BindError::MisplacedVariadic {
            position: Position::Return,
        });
    }

    for (index, (ty, layout)) in types.iter().zip(layouts).enumerate() {
        check_position(target, Position::Argument(index), *ty, Some(layout))?;
    }
    check_position(
        target,
        Position::Return,
        signature.return_type,
        descriptor.return_layout(),
    )?;

    Ok(ValidatedShape {
        argument_layouts: layouts.iter().collect(),
        argument_types: types.clone(),
        return_layout: descriptor.return_layout(),
        return_type: signature.return_type,
    })
}

fn check_position(
    target: &Target,
    position: Position,
    ty: LogicalType,
    layout: Option<&Layout>,
) -> Result<(), BindError> {
    let layout = match (ty, layout) {
        (LogicalType::Void, None) => return Ok(()),
        (LogicalType::Void, Some(layout)) => {
            return Err(BindError::VoidMismatch {
                position,
                ty,
                layout: Some(encode(layout)),
            });
        }
        (_, None) => {
            return Err(BindError::VoidMismatch {
                position,
                ty,
                layout: None,
            });
        }
        (_, Some(layout)) => layout,
    };

    if ty == LogicalType::Aggregate {
        if layout.is_group() {
            return Ok(());
        }
        return Err(BindError::AggregateLayoutExpected {
            position,
            layout: encode(layout),
        });
    }

    let Layout::Scalar { kind, bits } = *layout else {
        return Err(BindError::KindMismatch {
            position,
            ty,
            layout: encode(layout),
        });
    };

    let allowed = ty.allowed_bits(target);
    if !allowed.contains(&bits) {
        return Err(BindError::SizeMismatch {
            position,
            ty,
            bits,
            allowed,
        });
    }
    if !ty.admits_kind(kind) {
        return Err(BindError::KindMismatch {
            position,
            ty,
            layout: encode(layout),
        });
    }
    if !target.is_valid_scalar(kind, bits) {
        return Err(BindError::SizeMismatch {
            position,
            ty,
            bits,
            allowed: target.scalar_bits(kind),
        });
    }
    Ok(())
}
