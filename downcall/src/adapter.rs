use std::sync::Arc;

use crate::error::CallError;
use crate::marshal::{Pipeline, RawWord, Value};
use crate::native::{CallDescriptor, ReturnStorage, SlotClass};

/// A bound native function: target address, shared call descriptor and the
/// marshaling filters of the signature it was bound with.
///
/// Adapters hold no mutable state, so one adapter may be invoked from any
/// number of threads at once.
#[derive(Debug, Clone)]
pub struct NativeCallAdapter {
    address: usize,
    descriptor: Arc<CallDescriptor>,
    pipeline: Pipeline,
}

impl NativeCallAdapter {
    pub(crate) fn new(
        address: usize,
        descriptor: Arc<CallDescriptor>,
        pipeline: Pipeline,
    ) -> Self {
        Self {
            address,
            descriptor,
            pipeline,
        }
    }

    pub fn address(&self) -> usize {
        self.address
    }

    pub fn descriptor(&self) -> &Arc<CallDescriptor> {
        &self.descriptor
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Storage sized for this adapter's return value.
    pub fn return_storage(&self) -> ReturnStorage {
        ReturnStorage::for_class(self.descriptor.return_class())
    }

    /// Calls the target with already lowered words and returns the raw
    /// result. For an aggregate return the result is the address of the
    /// bytes inside `storage`.
    ///
    /// # Safety
    ///
    /// The function at the bound address must really have the bound shape,
    /// and aggregate words must address live buffers of their layout's size.
    /// `storage` is best taken from [`return_storage`](Self::return_storage);
    /// storage too small for an aggregate return is refused.
    pub unsafe fn invoke(
        &self,
        args: &[RawWord],
        storage: &mut ReturnStorage,
    ) -> Result<RawWord, CallError> {
        let expected = self.descriptor.arity();
        if args.len() != expected {
            return Err(CallError::ArgumentCount {
                expected,
                actual: args.len(),
            });
        }
        let required = match self.descriptor.return_class() {
            SlotClass::Aggregate { bytes } => bytes,
            _ => 0,
        };
        if storage.capacity() < required {
            return Err(CallError::ReturnStorageTooSmall {
                required,
                actual: storage.capacity(),
            });
        }
        // SAFETY: arity and storage size checked above, the rest is the
        // caller's contract
        Ok(unsafe { self.descriptor.call(self.address, args, storage) })
    }

    /// Lowers `args` through the argument filters, calls the target and
    /// lifts the result.
    ///
    /// # Safety
    ///
    /// The function at the bound address must really have the bound shape.
    pub unsafe fn call(&self, args: &[Value]) -> Result<Value, CallError> {
        let words = self.pipeline.lower(args)?;
        let mut storage = self.return_storage();
        // SAFETY: aggregate words point into `args`, which outlive the call;
        // storage was sized for this descriptor
        unsafe {
            let word = self.invoke(&words, &mut storage)?;
            Ok(self.pipeline.lift(word))
        }
    }
}
