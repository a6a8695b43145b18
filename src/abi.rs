//! C layout types shared with the native runtime.
//!
//! Everything in this module is `#[repr(C)]` (or transparent) and must stay byte compatible with
//! the runtime headers. Higher level wrappers live in the sibling modules.

use std::ffi::c_void;
use std::fmt;
use std::ops::BitOr;

/// ABI version this crate was written against.
pub const ABI_VERSION: u32 = 0x2020_0101;

/// Untyped native entry point as stored in the capability table.
pub type RawFn = unsafe extern "C" fn();

/// Type tag of a [`Variant`](crate::Variant) or [`TypeInfo`].
///
/// Kept as a transparent byte rather than a Rust enum because the native side may hand back tags
/// this crate does not know about.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VarType(pub u8);

impl VarType {
    pub const NONE: VarType = VarType(0);
    pub const ANY: VarType = VarType(1);
    pub const ENUM: VarType = VarType(2);
    pub const BOOL: VarType = VarType(3);
    pub const INT: VarType = VarType(4);
    pub const INT2: VarType = VarType(5);
    pub const INT3: VarType = VarType(6);
    pub const INT4: VarType = VarType(7);
    pub const INT8: VarType = VarType(8);
    pub const INT16: VarType = VarType(9);
    pub const FLOAT: VarType = VarType(10);
    pub const FLOAT2: VarType = VarType(11);
    pub const FLOAT3: VarType = VarType(12);
    pub const FLOAT4: VarType = VarType(13);
    pub const COLOR: VarType = VarType(14);
    pub const CHAIN: VarType = VarType(15);
    pub const BLOCK: VarType = VarType(16);
    pub const BYTES: VarType = VarType(51);
    pub const STRING: VarType = VarType(52);
    pub const PATH: VarType = VarType(53);
    pub const CONTEXT_VAR: VarType = VarType(54);
    pub const IMAGE: VarType = VarType(55);
    pub const SEQ: VarType = VarType(56);
    pub const TABLE: VarType = VarType(57);
    pub const SET: VarType = VarType(58);
    pub const AUDIO: VarType = VarType(59);
    pub const ARRAY: VarType = VarType(60);
    pub const OBJECT: VarType = VarType(61);

    pub fn name(self) -> &'static str {
        match self {
            VarType::NONE => "None",
            VarType::ANY => "Any",
            VarType::ENUM => "Enum",
            VarType::BOOL => "Bool",
            VarType::INT => "Int",
            VarType::INT2 => "Int2",
            VarType::INT3 => "Int3",
            VarType::INT4 => "Int4",
            VarType::INT8 => "Int8",
            VarType::INT16 => "Int16",
            VarType::FLOAT => "Float",
            VarType::FLOAT2 => "Float2",
            VarType::FLOAT3 => "Float3",
            VarType::FLOAT4 => "Float4",
            VarType::COLOR => "Color",
            VarType::CHAIN => "Chain",
            VarType::BLOCK => "Block",
            VarType::BYTES => "Bytes",
            VarType::STRING => "String",
            VarType::PATH => "Path",
            VarType::CONTEXT_VAR => "ContextVar",
            VarType::IMAGE => "Image",
            VarType::SEQ => "Seq",
            VarType::TABLE => "Table",
            VarType::SET => "Set",
            VarType::AUDIO => "Audio",
            VarType::ARRAY => "Array",
            VarType::OBJECT => "Object",
            _ => "Unknown",
        }
    }

    /// Whether the inner type tag is meaningful for values of this type.
    pub fn is_container(self) -> bool {
        matches!(
            self,
            VarType::SEQ | VarType::TABLE | VarType::SET | VarType::ARRAY
        )
    }
}

impl fmt::Debug for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.0)
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Flag bits carried by every variant.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VarFlags(u16);

impl VarFlags {
    pub const NONE: VarFlags = VarFlags(0);
    /// Payload storage is owned by the native runtime, never by the holder of the variant.
    pub const EXTERNAL: VarFlags = VarFlags(1 << 0);
    pub const REF_COUNTED: VarFlags = VarFlags(1 << 1);

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn from_bits(bits: u16) -> Self {
        VarFlags(bits)
    }

    pub const fn contains(self, other: VarFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: VarFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: VarFlags) {
        self.0 &= !other.0;
    }
}

impl BitOr for VarFlags {
    type Output = VarFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        VarFlags(self.0 | rhs.0)
    }
}

/// Descriptor element stored in a [`TypesInfo`] buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TypeInfo {
    pub basic_type: VarType,
    pub inner_type: VarType,
    pub flags: u16,
    pub object_id: u32,
}

impl TypeInfo {
    pub const fn new(basic_type: VarType) -> Self {
        Self {
            basic_type,
            inner_type: VarType::NONE,
            flags: 0,
            object_id: 0,
        }
    }

    pub const fn container(basic_type: VarType, inner_type: VarType) -> Self {
        Self {
            basic_type,
            inner_type,
            flags: 0,
            object_id: 0,
        }
    }
}

/// Growable descriptor buffer. The allocation belongs to the native runtime.
#[repr(C)]
#[derive(Debug)]
pub struct TypesInfo {
    pub(crate) elements: *mut TypeInfo,
    pub(crate) len: u32,
    pub(crate) cap: u32,
}

impl TypesInfo {
    pub const fn empty() -> Self {
        Self {
            elements: std::ptr::null_mut(),
            len: 0,
            cap: 0,
        }
    }
}

impl Default for TypesInfo {
    fn default() -> Self {
        Self::empty()
    }
}

/// Native set as laid out by the runtime: the set itself plus its API table.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawSet {
    pub(crate) opaque: *mut c_void,
    pub(crate) api: *const c_void,
}

impl RawSet {
    /// A never-allocated set.
    pub const fn zeroed() -> Self {
        Self {
            opaque: std::ptr::null_mut(),
            api: std::ptr::null(),
        }
    }

    /// True when the set has an API table attached. Never calls into the runtime.
    pub fn is_valid(&self) -> bool {
        !self.api.is_null()
    }
}

impl Default for RawSet {
    fn default() -> Self {
        Self::zeroed()
    }
}

macro_rules! opaque_ref {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub(crate) *mut c_void);

        impl $name {
            pub const fn null() -> Self {
                Self(std::ptr::null_mut())
            }

            pub fn is_null(self) -> bool {
                self.0.is_null()
            }

            pub fn as_ptr(self) -> *mut c_void {
                self.0
            }
        }
    };
}

opaque_ref!(
    /// Reference to a native chain.
    ChainRef
);
opaque_ref!(
    /// Reference to a native mesh (scheduler).
    MeshRef
);
opaque_ref!(
    /// Reference to a native scripting environment.
    ScriptRef
);

/// Capability table returned by version negotiation.
#[repr(C)]
#[derive(Debug)]
pub struct NativeTable {
    pub(crate) abi_version: u32,
    pub(crate) slot_count: u32,
    pub(crate) slots: *const Option<RawFn>,
}

// SAFETY: the table is immutable after negotiation and only holds function pointers.
unsafe impl Send for NativeTable {}
unsafe impl Sync for NativeTable {}

impl NativeTable {
    /// Builds a table over `slot_count` entries starting at `slots`.
    ///
    /// # Safety
    /// `slots` must point to `slot_count` readable entries that stay valid and unchanged for as
    /// long as the table is reachable.
    pub const unsafe fn from_raw_parts(
        abi_version: u32,
        slots: *const Option<RawFn>,
        slot_count: u32,
    ) -> Self {
        Self {
            abi_version,
            slot_count,
            slots,
        }
    }

    pub fn abi_version(&self) -> u32 {
        self.abi_version
    }

    pub fn slot_count(&self) -> u32 {
        self.slot_count
    }

    /// Entry at `index`, or `None` when the index is past the table or the entry is empty.
    pub fn entry(&self, index: usize) -> Option<RawFn> {
        if self.slots.is_null() || index >= self.slot_count as usize {
            return None;
        }
        // SAFETY: bounds checked above; validity guaranteed by `from_raw_parts`.
        unsafe { *self.slots.add(index) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_insert_and_remove() {
        let mut flags = VarFlags::NONE;
        flags.insert(VarFlags::EXTERNAL);
        assert!(flags.contains(VarFlags::EXTERNAL));
        assert!(!flags.contains(VarFlags::REF_COUNTED));
        flags.remove(VarFlags::EXTERNAL);
        assert_eq!(flags, VarFlags::NONE);
    }

    #[test]
    fn zeroed_set_is_invalid() {
        assert!(!RawSet::default().is_valid());
    }

    #[test]
    fn table_entry_past_end_is_none() {
        let table = unsafe { NativeTable::from_raw_parts(ABI_VERSION, std::ptr::null(), 0) };
        assert!(table.entry(0).is_none());
    }

    #[test]
    fn type_names() {
        assert_eq!(VarType::INT.name(), "Int");
        assert_eq!(VarType(200).name(), "Unknown");
        assert!(VarType::SEQ.is_container());
        assert!(!VarType::FLOAT.is_container());
    }
}
