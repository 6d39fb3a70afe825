mod adapter;
mod binder;
mod cache;
mod encoding;
mod error;
mod layout;
mod library;
mod marshal;
mod native;
mod signature;
mod target;
mod validate;

pub use adapter::NativeCallAdapter;
pub use binder::{Binder, BinderCreateInfo};
pub use cache::{CacheStats, DescriptorCache};
pub use encoding::{
    ArgumentKey, DescriptorKey, VOID, encode, encode_descriptor, encode_return,
    encode_sized,
};
pub use error::{BindError, CallError, LibraryError, Position};
pub use layout::{FunctionDescriptor, Layout, Member, ScalarKind};
pub use library::{AddressResolver, Library};
pub use marshal::{
    Aggregate, ArgFilter, Pipeline, RawWord, ReturnFilter, Value,
};
pub use native::{ArgumentTable, CallDescriptor, ReturnStorage, SlotClass};
pub use signature::{LogicalType, Signature};
pub use target::Target;
pub use validate::{ValidatedShape, validate};
