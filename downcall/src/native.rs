//! Native call descriptors on top of libffi.
//!
//! Layout trees are turned into libffi type trees, struct layouts are checked
//! against what libffi computes for them, and the resulting `ffi_cif` is
//! prepared once and then only read. Every aggregate type is initialised with
//! `ffi_get_struct_offsets` while it is built, so neither `ffi_prep_cif` nor
//! `ffi_call` ever writes to a shared type afterwards.

use std::ffi::c_void;
use std::mem::size_of;
use std::ptr;

use libffi::middle::Type;
use libffi::raw;

use crate::encoding::{ArgumentKey, DescriptorKey, trailing_padding_bits};
use crate::layout::{Layout, Member, ScalarKind};

/// Register/stack-width bit pattern of one argument or return value.
pub type RawWord = u64;

/// How a value travels through an argument or return slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotClass {
    Void,
    Integer { bytes: usize },
    Float,
    Double,
    Pointer,
    /// Passed and returned through memory; the word is an address.
    Aggregate { bytes: usize },
}

impl SlotClass {
    pub fn of(layout: &Layout) -> Result<Self, String> {
        match layout {
            Layout::Scalar { kind, bits } => Ok(match kind {
                ScalarKind::Float => Self::Float,
                ScalarKind::Double => Self::Double,
                ScalarKind::Pointer => Self::Pointer,
                _ => Self::Integer {
                    bytes: (*bits / 8) as usize,
                },
            }),
            Layout::Sequence { .. } | Layout::Group { .. } => {
                Ok(Self::Aggregate {
                    bytes: layout.byte_size(),
                })
            }
            Layout::Padding { .. } => {
                Err("padding cannot be passed by itself".to_string())
            }
        }
    }

    pub fn of_return(layout: Option<&Layout>) -> Result<Self, String> {
        layout.map_or(Ok(Self::Void), Self::of)
    }

    /// Lays `word` out in an argument slot at the slot's native width, so
    /// libffi reads the right bytes on either endianness.
    fn store(self, word: RawWord) -> u64 {
        let mut bytes = [0u8; 8];
        match self {
            Self::Integer { bytes: 1 } => {
                bytes[..1].copy_from_slice(&(word as u8).to_ne_bytes());
            }
            Self::Integer { bytes: 2 } => {
                bytes[..2].copy_from_slice(&(word as u16).to_ne_bytes());
            }
            Self::Integer { bytes: 4 } | Self::Float => {
                bytes[..4].copy_from_slice(&(word as u32).to_ne_bytes());
            }
            Self::Pointer => {
                bytes[..size_of::<usize>()]
                    .copy_from_slice(&(word as usize).to_ne_bytes());
            }
            Self::Integer { .. } | Self::Double => {
                bytes = word.to_ne_bytes();
            }
            Self::Void | Self::Aggregate { .. } => {}
        }
        u64::from_ne_bytes(bytes)
    }

    /// Reads a return value back out of `storage`.
    ///
    /// # Safety
    ///
    /// `storage` must have been filled by a call through a descriptor whose
    /// return class is `self`.
    unsafe fn load(self, storage: &ReturnStorage) -> RawWord {
        let ptr = storage.as_ptr();
        // SAFETY: storage is at least one aligned word long and libffi wrote
        // a value of this class at offset 0
        unsafe {
            match self {
                Self::Void => 0,
                // libffi widens integral returns narrower than a word to a
                // full pointer-sized ffi_arg
                Self::Integer { bytes } if bytes < size_of::<usize>() => {
                    let widened = ptr.cast::<usize>().read() as u64;
                    widened & (u64::MAX >> (64 - bytes * 8))
                }
                Self::Integer { .. } => ptr.cast::<u64>().read(),
                Self::Float => u64::from(ptr.cast::<f32>().read().to_bits()),
                Self::Double => ptr.cast::<f64>().read().to_bits(),
                Self::Pointer => ptr.cast::<usize>().read() as u64,
                Self::Aggregate { .. } => ptr as usize as u64,
            }
        }
    }
}

/// Word-aligned buffer a native call writes its return value into.
pub struct ReturnStorage {
    words: Vec<u64>,
}

impl ReturnStorage {
    pub fn for_class(class: SlotClass) -> Self {
        let bytes = match class {
            SlotClass::Aggregate { bytes } => bytes,
            _ => 0,
        };
        Self {
            words: vec![0; bytes.div_ceil(8).max(1)],
        }
    }

    /// Size of the buffer in bytes.
    pub fn capacity(&self) -> usize {
        self.words.len() * size_of::<u64>()
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.words.as_ptr().cast()
    }

    fn as_mut_ptr(&mut self) -> *mut c_void {
        self.words.as_mut_ptr().cast()
    }
}

fn scalar_type(kind: ScalarKind, bits: u32) -> Type {
    match kind {
        ScalarKind::Char => Type::i8(),
        ScalarKind::Short => Type::i16(),
        ScalarKind::Int => Type::i32(),
        ScalarKind::Long if bits == 32 => Type::i32(),
        ScalarKind::Long => Type::i64(),
        ScalarKind::Float => Type::f32(),
        ScalarKind::Double => Type::f64(),
        ScalarKind::Pointer => Type::pointer(),
    }
}

/// Initialises `ty` and returns its size and element offsets in bytes.
fn struct_offsets(ty: &Type) -> Result<(usize, Vec<usize>), String> {
    let raw_type = ty.as_raw_ptr();
    let mut elements = 0;
    // SAFETY: a struct type's element array is null-terminated
    unsafe {
        let fields = (*raw_type).elements;
        while !fields.is_null() && !(*fields.add(elements)).is_null() {
            elements += 1;
        }
    }
    let mut offsets = vec![0usize; elements];
    // SAFETY: raw_type is a live struct type with exactly `elements`
    // elements; offsets has room for all of them
    let status = unsafe {
        raw::ffi_get_struct_offsets(
            raw::ffi_abi_FFI_DEFAULT_ABI,
            raw_type,
            offsets.as_mut_ptr(),
        )
    };
    if status != raw::ffi_status_FFI_OK {
        return Err("libffi rejected the struct layout".to_string());
    }
    // SAFETY: initialised by ffi_get_struct_offsets above
    let size = unsafe { (*raw_type).size };
    Ok((size, offsets))
}

fn whole_bytes(bits: u64, what: &str) -> Result<usize, String> {
    if bits % 8 != 0 {
        return Err(format!("{what} of {bits} bits is not whole bytes"));
    }
    Ok((bits / 8) as usize)
}

/// Builds the libffi type of `layout`. Only the outermost aggregate gets
/// filler bytes for trailing padding; nested aggregates must already sit
/// where C alignment puts them.
pub fn native_type(layout: &Layout, outermost: bool) -> Result<Type, String> {
    match layout {
        Layout::Scalar { kind, bits } => Ok(scalar_type(*kind, *bits)),
        Layout::Padding { .. } => {
            Err("padding is only valid inside a group".to_string())
        }
        Layout::Sequence { element, count } => {
            if *count == 0 {
                return Err("zero-length sequences are not supported".into());
            }
            let element_type = native_type(element, false)?;
            if element.is_aggregate() {
                let (size, _) = struct_offsets(&element_type)?;
                if size != whole_bytes(element.bit_size(), "element")? {
                    return Err(format!(
                        "sequence element declares {} bytes, native stride \
                         is {size}",
                        element.byte_size()
                    ));
                }
            }
            let ty = Type::structure(std::iter::repeat_n(element_type, *count));
            struct_offsets(&ty)?;
            Ok(ty)
        }
        Layout::Group { members, union } => {
            if layout.concrete_members().next().is_none() {
                return Err("empty groups are not supported".to_string());
            }
            if !outermost && layout.bit_size() != layout.natural_bit_size() {
                return Err(format!(
                    "nested group declares {} bits, C lays it out in {}",
                    layout.bit_size(),
                    layout.natural_bit_size()
                ));
            }
            if *union {
                union_type(layout, outermost)
            } else {
                struct_type(layout, members, outermost)
            }
        }
    }
}

fn filler(bytes: usize) -> impl Iterator<Item = Type> {
    std::iter::repeat_with(Type::u8).take(bytes)
}

fn struct_type(
    layout: &Layout,
    members: &[Member],
    outermost: bool,
) -> Result<Type, String> {
    let mut fields = Vec::new();
    let mut declared_offsets = Vec::new();
    let mut offset_bits = 0u64;
    for member in members {
        if !member.is_padding() {
            declared_offsets.push(whole_bytes(offset_bits, "member offset")?);
            fields.push(native_type(&member.layout, false)?);
        }
        offset_bits += member.layout.bit_size();
    }
    if outermost {
        let padding = trailing_padding_bits(layout);
        fields.extend(filler(whole_bytes(padding, "trailing padding")?));
    }

    let ty = Type::structure(fields);
    let (size, offsets) = struct_offsets(&ty)?;
    for (index, declared) in declared_offsets.iter().enumerate() {
        if offsets[index] != *declared {
            return Err(format!(
                "member {index} declared at byte {declared}, native offset \
                 is {}",
                offsets[index]
            ));
        }
    }
    if outermost {
        check_size(layout, size)?;
    }
    Ok(ty)
}

/// Whether an eightbyte holding only floating members may travel in a vector
/// register even when the members disagree on width. x86-64 SysV merges
/// classes per eightbyte; elsewhere only homogeneous floating aggregates do.
const FLOATS_MERGE_PER_EIGHTBYTE: bool =
    cfg!(all(target_arch = "x86_64", not(windows)));

/// One word of the struct a union is lowered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnionWord {
    Float,
    Double,
    Integer { bytes: usize },
}

impl UnionWord {
    fn native_type(self) -> Type {
        match self {
            Self::Float => Type::f32(),
            Self::Double => Type::f64(),
            Self::Integer { bytes: 1 } => Type::i8(),
            Self::Integer { bytes: 2 } => Type::i16(),
            Self::Integer { bytes: 4 } => Type::i32(),
            Self::Integer { .. } => Type::i64(),
        }
    }
}

/// A scalar inside an aggregate, as a byte range from the aggregate's start.
struct Leaf {
    start: usize,
    end: usize,
    kind: ScalarKind,
}

fn collect_leaves(layout: &Layout, offset_bits: u64, leaves: &mut Vec<Leaf>) {
    match layout {
        Layout::Scalar { kind, bits } => leaves.push(Leaf {
            start: (offset_bits / 8) as usize,
            end: (offset_bits + u64::from(*bits)).div_ceil(8) as usize,
            kind: *kind,
        }),
        Layout::Padding { .. } => {}
        Layout::Sequence { element, count } => {
            let stride = element.bit_size();
            for index in 0..*count as u64 {
                collect_leaves(element, offset_bits + index * stride, leaves);
            }
        }
        Layout::Group { members, union } => {
            let mut member_offset = offset_bits;
            for member in members {
                if *union {
                    collect_leaves(&member.layout, offset_bits, leaves);
                } else {
                    collect_leaves(&member.layout, member_offset, leaves);
                    member_offset += member.layout.bit_size();
                }
            }
        }
    }
}

/// libffi has no unions, so a union is lowered to a struct of words with the
/// union's size and alignment. Each eightbyte becomes floating words when
/// every member overlapping it is floating, and integer words of the union's
/// alignment otherwise, which is how C classifies the union itself.
fn union_words(layout: &Layout) -> Result<Vec<UnionWord>, String> {
    let size = whole_bytes(layout.natural_bit_size(), "union size")?;
    let unit = whole_bytes(layout.natural_align_bits().min(64), "alignment")?;
    let mut leaves = Vec::new();
    collect_leaves(layout, 0, &mut leaves);
    let homogeneous =
        leaves.windows(2).all(|pair| pair[0].kind == pair[1].kind);

    let mut words = Vec::new();
    for start in (0..size).step_by(8) {
        let end = (start + 8).min(size);
        let mut overlapping = leaves
            .iter()
            .filter(|leaf| leaf.start < end && leaf.end > start)
            .peekable();
        let floating = overlapping.peek().is_some()
            && overlapping.all(|leaf| leaf.kind.is_floating())
            && (FLOATS_MERGE_PER_EIGHTBYTE || homogeneous);
        match (floating, unit) {
            (true, 8) => words.push(UnionWord::Double),
            (true, _) => words.extend(
                std::iter::repeat_n(UnionWord::Float, (end - start) / 4),
            ),
            (false, bytes) => words.extend(std::iter::repeat_n(
                UnionWord::Integer { bytes },
                (end - start) / bytes,
            )),
        }
    }
    Ok(words)
}

fn union_type(layout: &Layout, outermost: bool) -> Result<Type, String> {
    for member in layout.concrete_members() {
        native_type(&member.layout, false)?;
    }
    let mut fields = union_words(layout)?
        .into_iter()
        .map(UnionWord::native_type)
        .collect::<Vec<_>>();
    if outermost {
        let padding = trailing_padding_bits(layout);
        fields.extend(filler(whole_bytes(padding, "trailing padding")?));
    }

    let ty = Type::structure(fields);
    let (size, _) = struct_offsets(&ty)?;
    if outermost {
        check_size(layout, size)?;
    }
    Ok(ty)
}

fn check_size(layout: &Layout, native_size: usize) -> Result<(), String> {
    let declared = whole_bytes(layout.bit_size(), "aggregate size")?;
    if declared != native_size {
        return Err(format!(
            "aggregate declares {declared} bytes, native size is \
             {native_size}"
        ));
    }
    Ok(())
}

/// Native argument types of one argument shape, shared by every descriptor
/// whose arguments encode the same way.
pub struct ArgumentTable {
    key: ArgumentKey,
    classes: Vec<SlotClass>,
    raw_types: Vec<*mut raw::ffi_type>,
    // owns what raw_types points into
    _types: Vec<Type>,
}

// SAFETY: the type trees are fully initialised in `build` and only read
// afterwards
unsafe impl Send for ArgumentTable {}
// SAFETY: see above
unsafe impl Sync for ArgumentTable {}

impl ArgumentTable {
    pub fn build(key: ArgumentKey, layouts: &[&Layout]) -> Result<Self, String> {
        let mut types = Vec::with_capacity(layouts.len());
        let mut classes = Vec::with_capacity(layouts.len());
        for (index, layout) in layouts.iter().enumerate() {
            let ty = native_type(layout, true)
                .map_err(|reason| format!("argument {index}: {reason}"))?;
            classes.push(SlotClass::of(layout)?);
            types.push(ty);
        }
        let raw_types = types.iter().map(Type::as_raw_ptr).collect();
        Ok(Self {
            key,
            classes,
            raw_types,
            _types: types,
        })
    }

    pub fn key(&self) -> &ArgumentKey {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn classes(&self) -> &[SlotClass] {
        &self.classes
    }
}

/// A prepared call interface: argument table, return type and `ffi_cif`.
pub struct CallDescriptor {
    key: DescriptorKey,
    arguments: std::sync::Arc<ArgumentTable>,
    return_class: SlotClass,
    cif: Box<raw::ffi_cif>,
    _return_type: Type,
}

// SAFETY: the cif and the types it points to are never written after
// `build`; ffi_call only reads them
unsafe impl Send for CallDescriptor {}
// SAFETY: see above
unsafe impl Sync for CallDescriptor {}

impl CallDescriptor {
    pub fn build(
        key: DescriptorKey,
        arguments: std::sync::Arc<ArgumentTable>,
        return_layout: Option<&Layout>,
    ) -> Result<Self, String> {
        let return_type = match return_layout {
            Some(layout) => native_type(layout, true)
                .map_err(|reason| format!("return value: {reason}"))?,
            None => Type::void(),
        };
        let return_class = SlotClass::of_return(return_layout)?;

        // SAFETY: an all-zero ffi_cif is a valid blank to prepare
        let mut cif: Box<raw::ffi_cif> =
            Box::new(unsafe { std::mem::zeroed() });
        let nargs = arguments.raw_types.len() as u32;
        // SAFETY: the argument and return types outlive the cif because the
        // descriptor owns both; libffi does not write through atypes
        let status = unsafe {
            raw::ffi_prep_cif(
                &mut *cif,
                raw::ffi_abi_FFI_DEFAULT_ABI,
                nargs,
                return_type.as_raw_ptr(),
                arguments.raw_types.as_ptr().cast_mut(),
            )
        };
        if status != raw::ffi_status_FFI_OK {
            return Err(format!("ffi_prep_cif failed with status {status}"));
        }

        Ok(Self {
            key,
            arguments,
            return_class,
            cif,
            _return_type: return_type,
        })
    }

    pub fn key(&self) -> &DescriptorKey {
        &self.key
    }

    pub fn argument_table(&self) -> &std::sync::Arc<ArgumentTable> {
        &self.arguments
    }

    pub fn return_class(&self) -> SlotClass {
        self.return_class
    }

    pub fn arity(&self) -> usize {
        self.arguments.len()
    }

    /// Performs the raw call.
    ///
    /// # Safety
    ///
    /// `address` must be a function with exactly this native shape,
    /// `args.len()` must equal [`arity`](Self::arity), every aggregate word
    /// must address at least as many readable bytes as its layout declares,
    /// and `storage` must come from [`ReturnStorage::for_class`] with this
    /// descriptor's return class.
    pub unsafe fn call(
        &self,
        address: usize,
        args: &[RawWord],
        storage: &mut ReturnStorage,
    ) -> RawWord {
        let classes = self.arguments.classes();
        debug_assert_eq!(args.len(), classes.len());

        let mut slots: Vec<u64> = args
            .iter()
            .zip(classes)
            .map(|(word, class)| class.store(*word))
            .collect();
        let mut values: Vec<*mut c_void> = slots
            .iter_mut()
            .zip(args.iter().zip(classes))
            .map(|(slot, (word, class))| match class {
                SlotClass::Aggregate { .. } => *word as usize as *mut c_void,
                _ => ptr::from_mut(slot).cast(),
            })
            .collect();

        // SAFETY: caller guarantees address is a function of this shape
        let code = unsafe {
            std::mem::transmute::<usize, unsafe extern "C" fn()>(address)
        };
        // SAFETY: the cif was prepared for exactly these slots and is only
        // read by ffi_call; slots and values outlive the call
        unsafe {
            raw::ffi_call(
                ptr::from_ref(&*self.cif).cast_mut(),
                Some(code),
                storage.as_mut_ptr(),
                values.as_mut_ptr(),
            );
            self.return_class.load(storage)
        }
    }
}

impl std::fmt::Debug for CallDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallDescriptor")
            .field("key", &self.key)
            .field("arguments", &self.arguments.classes)
            .field("return_class", &self.return_class)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::LogicalType;
    use crate::target::Target;
    use std::sync::Arc;

    const T: Target = Target::host();

    #[repr(C)]
    #[derive(Clone, Copy)]
    struct IntPair {
        a: i32,
        b: i32,
    }

    extern "C" fn add_ints(a: i32, b: i32) -> i32 {
        a.wrapping_add(b)
    }

    extern "C" fn scale(x: f64, by: f32) -> f64 {
        x * f64::from(by)
    }

    extern "C" fn negate_char(c: i8) -> i8 {
        c.wrapping_neg()
    }

    extern "C" fn swap_pair(pair: IntPair) -> IntPair {
        IntPair {
            a: pair.b,
            b: pair.a,
        }
    }

    fn int_pair() -> Layout {
        Layout::structure([T.c_int(), T.c_int()])
    }

    fn descriptor(args: &[&Layout], ret: Option<&Layout>) -> CallDescriptor {
        let arguments = ArgumentKey::new(args.iter().copied());
        let table = ArgumentTable::build(arguments.clone(), args)
            .expect("argument table");
        let key = DescriptorKey::new(&arguments, ret, LogicalType::Void);
        CallDescriptor::build(key, Arc::new(table), ret).expect("descriptor")
    }

    #[test]
    fn slot_classes() {
        assert_eq!(
            SlotClass::of(&T.c_short()),
            Ok(SlotClass::Integer { bytes: 2 })
        );
        assert_eq!(SlotClass::of(&T.c_float()), Ok(SlotClass::Float));
        assert_eq!(
            SlotClass::of(&int_pair()),
            Ok(SlotClass::Aggregate { bytes: 8 })
        );
        assert_eq!(SlotClass::of_return(None), Ok(SlotClass::Void));
        assert!(SlotClass::of(&Layout::padding(8)).is_err());
    }

    #[test]
    fn narrow_slots_read_back_at_native_width() {
        let slot = SlotClass::Integer { bytes: 2 }.store(0xffff_1234);
        let read = unsafe { ptr::from_ref(&slot).cast::<u16>().read() };
        assert_eq!(read, 0x1234);

        let bits = (-2.5f32).to_bits() as u64;
        let slot = SlotClass::Float.store(bits);
        let read = unsafe { ptr::from_ref(&slot).cast::<f32>().read() };
        assert_eq!(read, -2.5);
    }

    #[test]
    fn calls_int_function() {
        let int = T.c_int();
        let desc = descriptor(&[&int, &int], Some(&int));
        let mut storage = ReturnStorage::for_class(desc.return_class());
        let word = unsafe {
            desc.call(add_ints as usize, &[112, 123], &mut storage)
        };
        assert_eq!(word, 235);

        let word = unsafe {
            desc.call(
                add_ints as usize,
                &[(-10i32) as u32 as u64, 3],
                &mut storage,
            )
        };
        assert_eq!(word as u32 as i32, -7);
    }

    #[test]
    fn calls_float_function() {
        let double = T.c_double();
        let float = T.c_float();
        let desc = descriptor(&[&double, &float], Some(&double));
        let mut storage = ReturnStorage::for_class(desc.return_class());
        let args = [1.5f64.to_bits(), u64::from(4.0f32.to_bits())];
        let word = unsafe { desc.call(scale as usize, &args, &mut storage) };
        assert_eq!(f64::from_bits(word), 6.0);
    }

    #[test]
    fn narrow_integer_return_is_masked() {
        let char_layout = T.c_char();
        let desc = descriptor(&[&char_layout], Some(&char_layout));
        let mut storage = ReturnStorage::for_class(desc.return_class());
        let word =
            unsafe { desc.call(negate_char as usize, &[5], &mut storage) };
        assert_eq!(word, 0xfb);
        assert_eq!(word as u8 as i8, -5);
    }

    #[test]
    fn struct_by_value() {
        let pair = int_pair();
        let desc = descriptor(&[&pair], Some(&pair));
        assert_eq!(desc.return_class(), SlotClass::Aggregate { bytes: 8 });
        let input = IntPair { a: 7, b: 9 };
        let mut storage = ReturnStorage::for_class(desc.return_class());
        let address = ptr::from_ref(&input) as usize as u64;
        let word = unsafe {
            desc.call(swap_pair as usize, &[address], &mut storage)
        };
        assert_eq!(word, storage.as_ptr() as usize as u64);
        let output = unsafe { storage.as_ptr().cast::<IntPair>().read() };
        assert_eq!((output.a, output.b), (9, 7));
    }

    #[test]
    fn struct_types_match_c_layout() {
        let layout = Layout::structure([
            Member::named("c", T.c_char()),
            Member::padding(24),
            Member::named("i", T.c_int()),
            Member::named("d", T.c_double()),
        ]);
        assert!(native_type(&layout, true).is_ok());
    }

    #[test]
    fn packed_structs_are_rejected() {
        let layout = Layout::structure([T.c_char(), T.c_int()]);
        let err = native_type(&layout, true).unwrap_err();
        assert!(err.contains("member 1"), "{err}");
    }

    #[test]
    fn misplaced_padding_is_rejected() {
        let layout = Layout::structure([
            Member::unnamed(T.c_char()),
            Member::padding(56),
            Member::unnamed(T.c_int()),
        ]);
        assert!(native_type(&layout, true).is_err());
    }

    #[test]
    fn trailing_padding_becomes_filler() {
        let layout = Layout::structure([
            Member::unnamed(T.c_int()),
            Member::unnamed(T.c_int()),
            Member::unnamed(T.c_int()),
            Member::padding(32),
        ]);
        let ty = native_type(&layout, true).expect("padded struct");
        let (size, offsets) = struct_offsets(&ty).expect("offsets");
        assert_eq!(offsets.len(), 7);
        assert_eq!(size, 16);
    }

    #[test]
    fn arrays_and_unions() {
        let layout = Layout::structure([
            Layout::sequence(T.c_int(), 4),
            Layout::sequence(int_pair(), 2),
        ]);
        assert!(native_type(&layout, true).is_ok());

        let union = Layout::union([T.c_char(), T.c_double()]);
        let ty = native_type(&union, true).expect("union");
        assert_eq!(struct_offsets(&ty).expect("offsets").0, 8);

        // twelve chars over a double: C rounds the union up to 16 bytes
        let short = Layout::union([
            Member::unnamed(Layout::sequence(T.c_char(), 12)),
            Member::unnamed(T.c_double()),
        ]);
        assert!(native_type(&short, true).is_err());
        let padded = Layout::union([
            Member::unnamed(Layout::sequence(T.c_char(), 12)),
            Member::unnamed(T.c_double()),
            Member::padding(128),
        ]);
        let ty = native_type(&padded, true).expect("padded union");
        assert_eq!(struct_offsets(&ty).expect("offsets").0, 16);
    }

    #[test]
    fn union_words_follow_member_classes() {
        use UnionWord::{Double, Float, Integer};

        let int_or_float = Layout::union([T.c_int(), T.c_float()]);
        assert_eq!(
            union_words(&int_or_float),
            Ok(vec![Integer { bytes: 4 }])
        );

        let bytes_or_double = Layout::union([
            Member::unnamed(Layout::sequence(T.c_char(), 12)),
            Member::unnamed(T.c_double()),
            Member::padding(128),
        ]);
        assert_eq!(
            union_words(&bytes_or_double),
            Ok(vec![Integer { bytes: 8 }, Integer { bytes: 8 }])
        );

        let floats = Layout::union([
            Layout::sequence(T.c_float(), 3),
            T.c_float(),
        ]);
        assert_eq!(union_words(&floats), Ok(vec![Float, Float, Float]));

        let doubles = Layout::union([
            T.c_double(),
            Layout::sequence(T.c_double(), 2),
        ]);
        assert_eq!(union_words(&doubles), Ok(vec![Double, Double]));

        // the float after the union shares its eightbyte with an int
        let tagged = Layout::structure([T.c_float(), int_or_float]);
        let ty = native_type(&tagged, true).expect("tagged union");
        assert_eq!(struct_offsets(&ty).expect("offsets"), (8, vec![0, 4]));
    }

    #[test]
    fn mixed_width_floats_merge_only_where_the_abi_allows() {
        let float_or_double = Layout::union([T.c_float(), T.c_double()]);
        let expected = if FLOATS_MERGE_PER_EIGHTBYTE {
            UnionWord::Double
        } else {
            UnionWord::Integer { bytes: 8 }
        };
        assert_eq!(union_words(&float_or_double), Ok(vec![expected]));
    }

    #[test]
    fn padded_nested_groups_are_rejected() {
        let padded = Layout::structure([
            Member::unnamed(T.c_int()),
            Member::padding(32),
        ]);
        // accepted on its own: the padding becomes trailing filler
        assert!(native_type(&padded, true).is_ok());

        let outer = Layout::structure([T.c_int(), padded.clone()]);
        let err = native_type(&outer, true).unwrap_err();
        assert!(err.contains("nested group"), "{err}");

        let padded_union = Layout::union([
            Member::unnamed(T.c_int()),
            Member::padding(64),
        ]);
        let outer = Layout::structure([T.c_int(), padded_union]);
        assert!(native_type(&outer, true).is_err());
        assert!(native_type(&Layout::sequence(padded, 2), true).is_err());
    }

    #[test]
    fn degenerate_layouts_are_rejected() {
        assert!(native_type(&Layout::sequence(T.c_int(), 0), true).is_err());
        assert!(native_type(&Layout::structure(Vec::<Member>::new()), true)
            .is_err());
        assert!(native_type(&Layout::padding(8), true).is_err());
        let odd = Layout::structure([
            Member::unnamed(T.c_int()),
            Member::padding(4),
        ]);
        assert!(native_type(&odd, true).is_err());
    }
}
