use log::debug;

use crate::adapter::NativeCallAdapter;
use crate::cache::DescriptorCache;
use crate::error::BindError;
use crate::layout::FunctionDescriptor;
use crate::marshal::Pipeline;
use crate::signature::Signature;
use crate::target::Target;
use crate::validate::validate;

#[derive(Debug, Default, Clone, Copy)]
pub struct BinderCreateInfo {
    // platform whose width rules signatures are checked against
    pub target: Target,
}

/// Binds native function addresses to managed signatures. Owns the
/// descriptor cache, so everything bound through one binder shares
/// descriptors; a binder is `Sync` and is meant to be shared.
#[derive(Debug, Default)]
pub struct Binder {
    target: Target,
    cache: DescriptorCache,
}

impl Binder {
    pub fn new(info: BinderCreateInfo) -> Self {
        Self {
            target: info.target,
            cache: DescriptorCache::new(),
        }
    }

    pub fn host() -> Self {
        Self::new(BinderCreateInfo::default())
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn cache(&self) -> &DescriptorCache {
        &self.cache
    }

    /// Validates `signature` against `descriptor`, fetches or builds the
    /// call descriptor and returns an adapter for `address`.
    ///
    /// Only the host target can produce callable descriptors; binders for
    /// other targets are useful for validation alone.
    pub fn bind(
        &self,
        address: usize,
        descriptor: &FunctionDescriptor,
        signature: &Signature,
    ) -> Result<NativeCallAdapter, BindError> {
        if address == 0 {
            return Err(BindError::NullAddress);
        }

        let shape = validate(&self.target, signature, descriptor)?;
        let arguments = shape.argument_key();
        let key = shape.descriptor_key(&arguments);
        let call_descriptor = self
            .cache
            .get_or_build(
                &key,
                &arguments,
                &shape.argument_layouts,
                shape.return_layout,
            )
            .map_err(|reason| BindError::DescriptorBuildFailed {
                key: key.to_string(),
                reason,
            })?;

        debug!("bound {address:#x} as {signature} via {key}");
        Ok(NativeCallAdapter::new(
            address,
            call_descriptor,
            Pipeline::build(&shape),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CallError, Position};
    use crate::layout::{Layout, Member};
    use crate::marshal::{Aggregate, Value};
    use crate::signature::LogicalType;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
    use std::thread;

    const T: Target = Target::host();

    #[repr(C)]
    #[derive(Clone, Copy, Debug, PartialEq)]
    struct IntPair {
        elem1: i32,
        elem2: i32,
    }

    extern "C" fn add2_int(a: i32, b: i32) -> i32 {
        a.wrapping_add(b)
    }

    extern "C" fn both(a: i32, b: i32) -> i32 {
        (a != 0 && b != 0) as i32
    }

    static LAST_SUM: AtomicI32 = AtomicI32::new(0);

    extern "C" fn record_sum(a: i32, b: i32) {
        LAST_SUM.store(a + b, Ordering::SeqCst);
    }

    extern "C" fn make_pair(a: i32, b: i32) -> IntPair {
        IntPair { elem1: a, elem2: b }
    }

    extern "C" fn add_pair(pair: IntPair, c: i32) -> i32 {
        pair.elem1 + pair.elem2 + c
    }

    extern "C" fn sum_array(values: *const i32, len: i32) -> i32 {
        let values = unsafe { std::slice::from_raw_parts(values, len as usize) };
        values.iter().sum()
    }

    #[repr(C)]
    #[derive(Clone, Copy)]
    #[allow(dead_code)]
    union IntOrFloat {
        i: i32,
        f: f32,
    }

    extern "C" fn union_int(u: IntOrFloat) -> i32 {
        unsafe { u.i }
    }

    extern "C" fn make_union(i: i32) -> IntOrFloat {
        IntOrFloat { i }
    }

    #[repr(C)]
    union BytesOrDouble {
        bytes: [i8; 12],
        d: f64,
    }

    extern "C" fn sum_bytes(u: BytesOrDouble) -> i32 {
        unsafe { u.bytes }.iter().map(|&b| i32::from(b)).sum()
    }

    extern "C" fn union_double(u: BytesOrDouble) -> f64 {
        unsafe { u.d }
    }

    extern "C" fn make_bytes(seed: i32) -> BytesOrDouble {
        let mut bytes = [0i8; 12];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = (seed + i as i32) as i8;
        }
        BytesOrDouble { bytes }
    }

    #[repr(C)]
    #[allow(dead_code)]
    union FloatOrPair {
        f: f32,
        pair: [f32; 2],
    }

    extern "C" fn second_float(u: FloatOrPair) -> f32 {
        unsafe { u.pair[1] }
    }

    #[repr(C)]
    struct Tagged {
        scale: f32,
        value: IntOrFloat,
    }

    extern "C" fn scaled(tagged: Tagged) -> f32 {
        tagged.scale * unsafe { tagged.value.i } as f32
    }

    extern "C" fn make_tagged(scale: f32, i: i32) -> Tagged {
        Tagged {
            scale,
            value: IntOrFloat { i },
        }
    }

    fn int_int_to_int() -> FunctionDescriptor {
        FunctionDescriptor::of(T.c_int(), [T.c_int(), T.c_int()])
    }

    fn ints(ret: LogicalType) -> Signature {
        Signature::new(ret, [ret, ret])
    }

    fn int_or_float_layout() -> Layout {
        Layout::union([
            Member::named("i", T.c_int()),
            Member::named("f", T.c_float()),
        ])
    }

    fn bytes_or_double_layout() -> Layout {
        Layout::union([
            Member::named("bytes", Layout::sequence(T.c_char(), 12)),
            Member::named("d", T.c_double()),
            Member::padding(128),
        ])
    }

    fn tagged_layout() -> Layout {
        Layout::structure([
            Member::named("scale", T.c_float()),
            Member::named("value", int_or_float_layout()),
        ])
    }

    fn aggregate_result(result: Result<Value, CallError>) -> Aggregate {
        match result {
            Ok(Value::Aggregate(aggregate)) => aggregate,
            other => panic!("expected an aggregate, got {other:?}"),
        }
    }

    fn pair_layout() -> Layout {
        Layout::structure([
            Member::named("elem1", T.c_int()),
            Member::named("elem2", T.c_int()),
        ])
    }

    #[test]
    fn adds_two_ints() {
        let binder = Binder::host();
        let adapter = binder
            .bind(
                add2_int as usize,
                &int_int_to_int(),
                &ints(LogicalType::I32),
            )
            .expect("bind");
        let result = unsafe { adapter.call(&[Value::I32(112), Value::I32(123)]) };
        assert_eq!(result, Ok(Value::I32(235)));
    }

    #[test]
    fn void_return() {
        let binder = Binder::host();
        let descriptor = FunctionDescriptor::of_void([T.c_int(), T.c_int()]);
        let adapter = binder
            .bind(
                record_sum as usize,
                &descriptor,
                &Signature::new(
                    LogicalType::Void,
                    [LogicalType::I32, LogicalType::I32],
                ),
            )
            .expect("bind");
        let result = unsafe { adapter.call(&[Value::I32(454), Value::I32(398)]) };
        assert_eq!(result, Ok(Value::Void));
        assert_eq!(LAST_SUM.load(Ordering::SeqCst), 852);
    }

    #[test]
    fn repeated_binds_share_one_descriptor() {
        let binder = Binder::host();
        let descriptor = int_int_to_int();
        let signature = ints(LogicalType::I32);
        let adapters: Vec<_> = (0..5)
            .map(|_| {
                binder
                    .bind(add2_int as usize, &descriptor, &signature)
                    .expect("bind")
            })
            .collect();

        for adapter in &adapters[1..] {
            assert!(Arc::ptr_eq(adapters[0].descriptor(), adapter.descriptor()));
        }
        let stats = binder.cache().stats();
        assert_eq!(stats.hits, 4);
        assert_eq!(stats.descriptors_built, 1);
    }

    #[test]
    fn argument_types_with_equal_layouts_share_a_descriptor() {
        let binder = Binder::host();
        let descriptor = int_int_to_int();
        let signed = binder
            .bind(
                add2_int as usize,
                &descriptor,
                &Signature::new(
                    LogicalType::I32,
                    [LogicalType::I32, LogicalType::I32],
                ),
            )
            .expect("signed");
        let unsigned_args = binder
            .bind(
                add2_int as usize,
                &descriptor,
                &Signature::new(
                    LogicalType::I32,
                    [LogicalType::U32, LogicalType::Bool],
                ),
            )
            .expect("unsigned");
        assert!(Arc::ptr_eq(signed.descriptor(), unsigned_args.descriptor()));
        let result = unsafe {
            unsigned_args.call(&[Value::U32(40), Value::Bool(true)])
        };
        assert_eq!(result, Ok(Value::I32(41)));
    }

    #[test]
    fn bool_and_int_returns_do_not_share() {
        let binder = Binder::host();
        let descriptor = int_int_to_int();
        let as_int = binder
            .bind(both as usize, &descriptor, &ints(LogicalType::I32))
            .expect("int");
        let as_bool = binder
            .bind(both as usize, &descriptor, &ints(LogicalType::Bool))
            .expect("bool");
        assert!(!Arc::ptr_eq(as_int.descriptor(), as_bool.descriptor()));
        assert_eq!(binder.cache().len(), 2);
        assert_eq!(binder.cache().argument_table_count(), 1);

        let result =
            unsafe { as_bool.call(&[Value::Bool(true), Value::Bool(true)]) };
        assert_eq!(result, Ok(Value::Bool(true)));
        let result = unsafe { as_int.call(&[Value::I32(3), Value::I32(0)]) };
        assert_eq!(result, Ok(Value::I32(0)));
    }

    #[test]
    fn struct_return() {
        let binder = Binder::host();
        let descriptor =
            FunctionDescriptor::of(pair_layout(), [T.c_int(), T.c_int()]);
        let signature = Signature::new(
            LogicalType::Aggregate,
            [LogicalType::I32, LogicalType::I32],
        );
        let adapter = binder
            .bind(make_pair as usize, &descriptor, &signature)
            .expect("bind");
        let result = unsafe { adapter.call(&[Value::I32(11), Value::I32(-4)]) };
        let Ok(Value::Aggregate(pair)) = result else {
            panic!("expected an aggregate, got {result:?}");
        };
        assert_eq!(pair.len(), 8);
        assert_eq!(pair.read_i32(0), Some(11));
        assert_eq!(pair.read_i32(4), Some(-4));
    }

    #[test]
    fn struct_argument() {
        let binder = Binder::host();
        let descriptor =
            FunctionDescriptor::of(T.c_int(), [pair_layout(), T.c_int()]);
        let signature = Signature::new(
            LogicalType::I32,
            [LogicalType::Aggregate, LogicalType::I32],
        );
        let adapter = binder
            .bind(add_pair as usize, &descriptor, &signature)
            .expect("bind");
        let mut pair = Aggregate::zeroed(8);
        pair.write_i32(0, 31).expect("in bounds");
        pair.write_i32(4, 11).expect("in bounds");
        let result =
            unsafe { adapter.call(&[Value::Aggregate(pair), Value::I32(100)]) };
        assert_eq!(result, Ok(Value::I32(142)));
    }

    #[test]
    fn int_float_union_by_value() {
        let binder = Binder::host();
        let takes = binder
            .bind(
                union_int as usize,
                &FunctionDescriptor::of(T.c_int(), [int_or_float_layout()]),
                &Signature::new(LogicalType::I32, [LogicalType::Aggregate]),
            )
            .expect("bind argument");
        let mut u = Aggregate::zeroed(4);
        u.write_i32(0, 42).expect("in bounds");
        let result = unsafe { takes.call(&[Value::Aggregate(u)]) };
        assert_eq!(result, Ok(Value::I32(42)));

        let makes = binder
            .bind(
                make_union as usize,
                &FunctionDescriptor::of(int_or_float_layout(), [T.c_int()]),
                &Signature::new(LogicalType::Aggregate, [LogicalType::I32]),
            )
            .expect("bind return");
        let u = aggregate_result(unsafe { makes.call(&[Value::I32(777)]) });
        assert_eq!(u.len(), 4);
        assert_eq!(u.read_i32(0), Some(777));
    }

    #[test]
    fn bytes_over_double_union_by_value() {
        let binder = Binder::host();
        let descriptor =
            FunctionDescriptor::of(T.c_int(), [bytes_or_double_layout()]);
        let signature =
            Signature::new(LogicalType::I32, [LogicalType::Aggregate]);
        let sums = binder
            .bind(sum_bytes as usize, &descriptor, &signature)
            .expect("bind bytes");
        let mut u = Aggregate::zeroed(16);
        for offset in 0..12 {
            u.write_i8(offset, offset as i8 + 1).expect("in bounds");
        }
        let result = unsafe { sums.call(&[Value::Aggregate(u)]) };
        assert_eq!(result, Ok(Value::I32(78)));

        let reads_double = binder
            .bind(
                union_double as usize,
                &FunctionDescriptor::of(
                    T.c_double(),
                    [bytes_or_double_layout()],
                ),
                &Signature::new(LogicalType::F64, [LogicalType::Aggregate]),
            )
            .expect("bind double");
        let mut u = Aggregate::zeroed(16);
        u.write_f64(0, 2.5).expect("in bounds");
        let result = unsafe { reads_double.call(&[Value::Aggregate(u)]) };
        assert_eq!(result, Ok(Value::F64(2.5)));

        let makes = binder
            .bind(
                make_bytes as usize,
                &FunctionDescriptor::of(bytes_or_double_layout(), [T.c_int()]),
                &Signature::new(LogicalType::Aggregate, [LogicalType::I32]),
            )
            .expect("bind return");
        let u = aggregate_result(unsafe { makes.call(&[Value::I32(-3)]) });
        assert_eq!(u.len(), 16);
        assert_eq!(u.read_i8(0), Some(-3));
        assert_eq!(u.read_i8(11), Some(8));
    }

    #[test]
    fn float_only_union_by_value() {
        let binder = Binder::host();
        let layout = Layout::union([
            Member::named("f", T.c_float()),
            Member::named("pair", Layout::sequence(T.c_float(), 2)),
        ]);
        let adapter = binder
            .bind(
                second_float as usize,
                &FunctionDescriptor::of(T.c_float(), [layout]),
                &Signature::new(LogicalType::F32, [LogicalType::Aggregate]),
            )
            .expect("bind");
        let mut u = Aggregate::zeroed(8);
        u.write_f32(0, 1.25).expect("in bounds");
        u.write_f32(4, -6.5).expect("in bounds");
        let result = unsafe { adapter.call(&[Value::Aggregate(u)]) };
        assert_eq!(result, Ok(Value::F32(-6.5)));
    }

    #[test]
    fn union_nested_next_to_a_float() {
        let binder = Binder::host();
        let takes = binder
            .bind(
                scaled as usize,
                &FunctionDescriptor::of(T.c_float(), [tagged_layout()]),
                &Signature::new(LogicalType::F32, [LogicalType::Aggregate]),
            )
            .expect("bind argument");
        let mut tagged = Aggregate::zeroed(8);
        tagged.write_f32(0, 1.5).expect("in bounds");
        tagged.write_i32(4, 6).expect("in bounds");
        let result = unsafe { takes.call(&[Value::Aggregate(tagged)]) };
        assert_eq!(result, Ok(Value::F32(9.0)));

        let makes = binder
            .bind(
                make_tagged as usize,
                &FunctionDescriptor::of(
                    tagged_layout(),
                    [T.c_float(), T.c_int()],
                ),
                &Signature::new(
                    LogicalType::Aggregate,
                    [LogicalType::F32, LogicalType::I32],
                ),
            )
            .expect("bind return");
        let tagged = aggregate_result(unsafe {
            makes.call(&[Value::F32(0.5), Value::I32(-12)])
        });
        assert_eq!(tagged.read_f32(0), Some(0.5));
        assert_eq!(tagged.read_i32(4), Some(-12));
    }

    #[test]
    fn pointer_argument() {
        let binder = Binder::host();
        let descriptor =
            FunctionDescriptor::of(T.c_int(), [T.c_pointer(), T.c_int()]);
        let signature = Signature::new(
            LogicalType::I32,
            [LogicalType::Pointer, LogicalType::I32],
        );
        let adapter = binder
            .bind(sum_array as usize, &descriptor, &signature)
            .expect("bind");
        let values = [1, 2, 3, 4];
        let result = unsafe {
            adapter.call(&[
                Value::Pointer(values.as_ptr() as usize),
                Value::I32(values.len() as i32),
            ])
        };
        assert_eq!(result, Ok(Value::I32(10)));
    }

    #[test]
    fn arity_mismatch_leaves_cache_untouched() {
        let binder = Binder::host();
        let err = binder
            .bind(
                add2_int as usize,
                &int_int_to_int(),
                &Signature::new(LogicalType::I32, [LogicalType::I32]),
            )
            .unwrap_err();
        assert_eq!(
            err,
            BindError::ArityMismatch {
                expected: 2,
                actual: 1
            }
        );
        assert!(binder.cache().is_empty());
        assert_eq!(binder.cache().stats().misses, 0);
    }

    #[test]
    fn validation_errors_surface() {
        let binder = Binder::host();
        let err = binder
            .bind(
                add2_int as usize,
                &int_int_to_int(),
                &Signature::new(
                    LogicalType::F32,
                    [LogicalType::I32, LogicalType::I32],
                ),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            BindError::KindMismatch {
                position: Position::Return,
                ..
            }
        ));
        assert_eq!(
            binder
                .bind(0, &int_int_to_int(), &ints(LogicalType::I32))
                .unwrap_err(),
            BindError::NullAddress
        );
    }

    #[test]
    fn unbuildable_layouts_fail_bind() {
        let binder = Binder::host();
        let packed = Layout::structure([T.c_char(), T.c_int()]);
        let descriptor = FunctionDescriptor::of_void([packed]);
        let signature =
            Signature::new(LogicalType::Void, [LogicalType::Aggregate]);
        let err = binder
            .bind(record_sum as usize, &descriptor, &signature)
            .unwrap_err();
        let BindError::DescriptorBuildFailed { key, .. } = err else {
            panic!("expected a build failure, got {err:?}");
        };
        assert_eq!(key, "#2[CI]->void@void");
        assert!(binder.cache().is_empty());
    }

    #[test]
    fn concurrent_binds_build_once() {
        let binder = Arc::new(Binder::host());
        let calls = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let binder = binder.clone();
                let calls = calls.clone();
                thread::spawn(move || {
                    let adapter = binder
                        .bind(
                            add2_int as usize,
                            &int_int_to_int(),
                            &ints(LogicalType::I32),
                        )
                        .expect("bind");
                    for j in 0..100 {
                        let result = unsafe {
                            adapter.call(&[Value::I32(i), Value::I32(j)])
                        };
                        assert_eq!(result, Ok(Value::I32(i + j)));
                        calls.fetch_add(1, Ordering::Relaxed);
                    }
                    adapter
                })
            })
            .collect();
        let adapters: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread"))
            .collect();

        assert_eq!(calls.load(Ordering::Relaxed), 800);
        for adapter in &adapters[1..] {
            assert!(Arc::ptr_eq(adapters[0].descriptor(), adapter.descriptor()));
        }
        assert_eq!(binder.cache().stats().descriptors_built, 1);
    }

    #[test]
    fn va_list_rides_as_pointer() {
        let binder = Binder::host();
        let descriptor =
            FunctionDescriptor::of(T.c_int(), [T.c_int(), T.c_va_list()]);
        let signature = Signature::new(
            LogicalType::I32,
            [LogicalType::I32, LogicalType::VaList],
        );
        let adapter = binder
            .bind(add2_int as usize, &descriptor, &signature)
            .expect("bind");
        assert_eq!(adapter.descriptor().key().as_str(), "IP->I@i32");
    }
}
