//! Tagged dynamic value shared with the native runtime.

use std::ffi::{c_char, CStr, CString};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use tracing::warn;

use crate::abi::{VarFlags, VarType};
use crate::dispatch::Core;
use crate::error::{BridgeError, BridgeResult};

#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct StringView {
    pub(crate) ptr: *const c_char,
    pub(crate) len: u32,
    /// Zero for a borrowed view the native side must not free.
    pub(crate) cap: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct SeqView {
    pub(crate) elements: *mut Variant,
    pub(crate) len: u32,
    /// Zero for a borrowed view the native side must not free.
    pub(crate) cap: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) union VarPayload {
    pub(crate) bool_value: bool,
    pub(crate) int_value: i64,
    pub(crate) float_value: f64,
    pub(crate) string: StringView,
    pub(crate) seq: SeqView,
    pub(crate) raw: [u64; 2],
}

/// The runtime's dynamic value: payload, type tag, inner type tag and flags.
///
/// A `Variant` never releases anything on its own. Locally owned values are wrapped in a
/// [`Variable`]; values living in native memory are reached through
/// [`ExternalVariable`](crate::ExternalVariable).
#[repr(C)]
pub struct Variant {
    pub(crate) payload: VarPayload,
    pub(crate) value_type: VarType,
    pub(crate) inner_type: VarType,
    pub(crate) flags: VarFlags,
    pub(crate) ref_count: u32,
}

impl Default for Variant {
    fn default() -> Self {
        Self {
            payload: VarPayload { raw: [0; 2] },
            value_type: VarType::NONE,
            inner_type: VarType::NONE,
            flags: VarFlags::NONE,
            ref_count: 0,
        }
    }
}

impl Variant {
    pub fn type_tag(&self) -> VarType {
        self.value_type
    }

    pub fn inner_type(&self) -> VarType {
        self.inner_type
    }

    pub fn flags(&self) -> VarFlags {
        self.flags
    }

    pub fn is_external(&self) -> bool {
        self.flags.contains(VarFlags::EXTERNAL)
    }

    pub(crate) fn set_types(&mut self, value_type: VarType, inner_type: VarType) {
        self.value_type = value_type;
        self.inner_type = inner_type;
    }

    pub(crate) fn set_flags(&mut self, flags: VarFlags) {
        self.flags = flags;
    }

    pub fn set_none(&mut self) {
        self.payload = VarPayload { raw: [0; 2] };
        self.value_type = VarType::NONE;
    }

    pub fn set_bool(&mut self, value: bool) {
        self.payload = VarPayload { raw: [0; 2] };
        self.payload.bool_value = value;
        self.value_type = VarType::BOOL;
    }

    pub fn set_int(&mut self, value: i64) {
        self.payload = VarPayload { raw: [0; 2] };
        self.payload.int_value = value;
        self.value_type = VarType::INT;
    }

    pub fn set_float(&mut self, value: f64) {
        self.payload = VarPayload { raw: [0; 2] };
        self.payload.float_value = value;
        self.value_type = VarType::FLOAT;
    }

    pub fn as_bool(&self) -> Option<bool> {
        // SAFETY: the tag says the bool member is the active one.
        (self.value_type == VarType::BOOL).then(|| unsafe { self.payload.bool_value })
    }

    pub fn as_int(&self) -> Option<i64> {
        (self.value_type == VarType::INT).then(|| unsafe { self.payload.int_value })
    }

    pub fn as_float(&self) -> Option<f64> {
        (self.value_type == VarType::FLOAT).then(|| unsafe { self.payload.float_value })
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        if self.value_type != VarType::STRING {
            return None;
        }
        // SAFETY: string payloads are only produced by the runtime or `borrowed_str`, both of
        // which point `ptr` at `len` readable bytes.
        let view = unsafe { self.payload.string };
        if view.ptr.is_null() || view.len == 0 {
            return Some(&[]);
        }
        Some(unsafe { std::slice::from_raw_parts(view.ptr as *const u8, view.len as usize) })
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|bytes| std::str::from_utf8(bytes).ok())
    }

    pub fn as_seq(&self) -> Option<&[Variant]> {
        if self.value_type != VarType::SEQ {
            return None;
        }
        let view = unsafe { self.payload.seq };
        if view.elements.is_null() || view.len == 0 {
            return Some(&[]);
        }
        // SAFETY: see `as_bytes`.
        Some(unsafe { std::slice::from_raw_parts(view.elements, view.len as usize) })
    }

    /// String view over `text` that the runtime must copy, never free.
    pub(crate) fn borrowed_str(text: &CStr) -> Self {
        let mut var = Variant::default();
        var.payload.string = StringView {
            ptr: text.as_ptr(),
            len: text.to_bytes().len() as u32,
            cap: 0,
        };
        var.value_type = VarType::STRING;
        var
    }

    /// Sequence view over `elements` that the runtime must copy, never free.
    pub(crate) fn borrowed_seq(elements: &mut [Variant]) -> Self {
        let mut var = Variant::default();
        var.payload.seq = SeqView {
            elements: elements.as_mut_ptr(),
            len: elements.len() as u32,
            cap: 0,
        };
        var.value_type = VarType::SEQ;
        var
    }

    /// Bitwise copy that shares the payload with `self`.
    ///
    /// # Safety
    /// The copy must never be handed to anything that releases its payload.
    pub(crate) unsafe fn shallow_copy(&self) -> Variant {
        std::ptr::read(self)
    }
}

impl PartialEq for Variant {
    fn eq(&self, other: &Self) -> bool {
        if self.value_type != other.value_type {
            return false;
        }
        match self.value_type {
            VarType::NONE | VarType::ANY => true,
            VarType::BOOL => self.as_bool() == other.as_bool(),
            VarType::INT => self.as_int() == other.as_int(),
            VarType::FLOAT => self.as_float() == other.as_float(),
            VarType::STRING => self.as_bytes() == other.as_bytes(),
            VarType::SEQ => self.as_seq() == other.as_seq(),
            _ => unsafe { self.payload.raw == other.payload.raw },
        }
    }
}

impl fmt::Debug for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value_type {
            VarType::NONE => write!(f, "None"),
            VarType::BOOL => write!(f, "Bool({})", self.as_bool().unwrap_or_default()),
            VarType::INT => write!(f, "Int({})", self.as_int().unwrap_or_default()),
            VarType::FLOAT => write!(f, "Float({})", self.as_float().unwrap_or_default()),
            VarType::STRING => match self.as_str() {
                Some(text) => write!(f, "String({text:?})"),
                None => write!(f, "String(<{} bytes>)", self.as_bytes().map_or(0, <[u8]>::len)),
            },
            VarType::SEQ => f
                .debug_tuple("Seq")
                .field(&self.as_seq().unwrap_or_default())
                .finish(),
            other => write!(f, "{other:?}"),
        }
    }
}

impl Core {
    /// Asks the runtime for an independent deep copy of `source`.
    pub fn clone_var(self: &Arc<Self>, source: &Variant) -> BridgeResult<Variable> {
        let clone = self.clone_var_fn()?;
        let mut out = Variable::new(self);
        // SAFETY: both pointers are valid for the call; `out.var` starts zeroed.
        unsafe { clone(&mut out.var, source) };
        Ok(out)
    }
}

/// A locally owned variant. Dropping it releases its payload through the runtime.
pub struct Variable {
    var: Variant,
    core: Arc<Core>,
}

impl Variable {
    pub fn new(core: &Arc<Core>) -> Self {
        Self {
            var: Variant::default(),
            core: core.clone(),
        }
    }

    pub fn int(core: &Arc<Core>, value: i64) -> Self {
        let mut out = Self::new(core);
        out.var.set_int(value);
        out
    }

    pub fn float(core: &Arc<Core>, value: f64) -> Self {
        let mut out = Self::new(core);
        out.var.set_float(value);
        out
    }

    pub fn bool(core: &Arc<Core>, value: bool) -> Self {
        let mut out = Self::new(core);
        out.var.set_bool(value);
        out
    }

    /// Runtime-owned copy of `text`.
    pub fn string(core: &Arc<Core>, text: &str) -> BridgeResult<Self> {
        let text = CString::new(text).map_err(|_| BridgeError::InvalidName(text.to_string()))?;
        core.clone_var(&Variant::borrowed_str(&text))
    }

    /// Runtime-owned sequence holding deep copies of `items`.
    pub fn seq(core: &Arc<Core>, items: &[&Variant]) -> BridgeResult<Self> {
        // SAFETY: the shallow copies only back a borrowed view and are discarded untouched.
        let mut elements: Vec<Variant> =
            items.iter().map(|item| unsafe { item.shallow_copy() }).collect();
        core.clone_var(&Variant::borrowed_seq(&mut elements))
    }

    pub fn try_clone(&self) -> BridgeResult<Self> {
        self.core.clone_var(&self.var)
    }

    pub fn value(&self) -> &Variant {
        &self.var
    }

    /// Output slot for entry points that write a fresh value.
    pub(crate) fn raw_mut(&mut self) -> &mut Variant {
        &mut self.var
    }

    pub fn set_int(&mut self, value: i64) -> BridgeResult<()> {
        self.release()?;
        self.var.set_int(value);
        Ok(())
    }

    pub fn set_float(&mut self, value: f64) -> BridgeResult<()> {
        self.release()?;
        self.var.set_float(value);
        Ok(())
    }

    pub fn set_bool(&mut self, value: bool) -> BridgeResult<()> {
        self.release()?;
        self.var.set_bool(value);
        Ok(())
    }

    fn release(&mut self) -> BridgeResult<()> {
        if self.var.is_external() || self.var.value_type == VarType::NONE {
            return Ok(());
        }
        let destroy = self.core.destroy_var()?;
        // SAFETY: the payload was produced by the runtime and is owned by this variable.
        unsafe { destroy(&mut self.var) };
        self.var = Variant::default();
        Ok(())
    }
}

impl Deref for Variable {
    type Target = Variant;

    fn deref(&self) -> &Self::Target {
        &self.var
    }
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.var, f)
    }
}

impl Drop for Variable {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!(%err, "failed to release variable");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::ABI_VERSION;
    use crate::loopback::Loopback;

    fn core() -> Arc<Core> {
        Core::connect(Arc::new(Loopback::new()), ABI_VERSION).expect("connect")
    }

    #[test]
    fn default_is_none() {
        let var = Variant::default();
        assert_eq!(var.type_tag(), VarType::NONE);
        assert_eq!(var.flags(), VarFlags::NONE);
        assert!(var.as_int().is_none());
    }

    #[test]
    fn accessors_check_tag() {
        let mut var = Variant::default();
        var.set_float(1.5);
        assert_eq!(var.as_float(), Some(1.5));
        assert_eq!(var.as_int(), None);
        var.set_bool(true);
        assert_eq!(var.as_bool(), Some(true));
    }

    #[test]
    fn setters_keep_flags() {
        let mut var = Variant::default();
        var.set_flags(VarFlags::EXTERNAL);
        var.set_int(3);
        assert!(var.is_external());
    }

    #[test]
    fn string_clone_is_independent() {
        let core = core();
        let original = Variable::string(&core, "hello").expect("string");
        let copy = original.try_clone().expect("clone");
        assert_eq!(copy.as_str(), Some("hello"));
        drop(original);
        assert_eq!(copy.as_str(), Some("hello"));
    }

    #[test]
    fn seq_clone_copies_elements() {
        let core = core();
        let one = Variable::int(&core, 1);
        let name = Variable::string(&core, "two").expect("string");
        let seq = Variable::seq(&core, &[one.value(), name.value()]).expect("seq");
        drop(name);
        let items = seq.as_seq().expect("seq items");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_int(), Some(1));
        assert_eq!(items[1].as_str(), Some("two"));
    }

    #[test]
    fn clone_then_mutate_leaves_copy() {
        let core = core();
        let mut original = Variable::int(&core, 42);
        let copy = original.try_clone().expect("clone");
        assert_eq!(*copy.value(), *original.value());
        original.set_int(7).expect("set");
        assert_eq!(copy.as_int(), Some(42));
        assert_eq!(original.as_int(), Some(7));
    }

    #[test]
    fn interior_nul_is_rejected() {
        let core = core();
        let err = Variable::string(&core, "a\0b").unwrap_err();
        assert_eq!(err, BridgeError::InvalidName("a\0b".into()));
    }
}
