//! In-process native runtime.
//!
//! `Loopback` fills every slot of the capability table with C ABI functions implemented in Rust,
//! so hosts and tests can drive the bridge without the shared library. It follows the same
//! ownership rules as the real runtime: it owns descriptor buffers, sets, external storage and
//! cloned payloads, and frees them only through the matching entry points.
//!
//! The free functions below inspect loopback-owned chains, meshes and sets; they return `None` for
//! objects that did not come from this backend or were already destroyed.

mod entries;

use std::sync::atomic::Ordering;

use crate::abi::{NativeTable, RawFn, ABI_VERSION};
use crate::capability::NativeLibrary;
use crate::chain::Chain;
use crate::dispatch::Slot;
use crate::mesh::Mesh;
use crate::set::Set;

use entries::{LoopbackChain, LoopbackMesh, SetApi, CHAINS, MESHES, SET_API};

/// In-process implementation of the native capability table.
pub struct Loopback {
    table: Box<NativeTable>,
    _slots: Box<[Option<RawFn>; Slot::COUNT]>,
}

impl Loopback {
    pub fn new() -> Self {
        Self::with_missing(&[])
    }

    /// A runtime whose table lacks the given entries.
    pub fn with_missing(missing: &[Slot]) -> Self {
        let mut slots = Box::new(entries::table());
        for slot in missing {
            slots[slot.index()] = None;
        }
        // SAFETY: `slots` is boxed and kept alive next to the table.
        let table = unsafe {
            NativeTable::from_raw_parts(ABI_VERSION, slots.as_ptr(), Slot::COUNT as u32)
        };
        Self {
            table: Box::new(table),
            _slots: slots,
        }
    }
}

impl Default for Loopback {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl NativeLibrary for Loopback {
    fn describe(&self) -> String {
        "loopback".into()
    }

    fn negotiate_version(&self, version: u32) -> *const NativeTable {
        if version == ABI_VERSION {
            &*self.table
        } else {
            std::ptr::null()
        }
    }
}

fn with_chain<T>(chain: &Chain, read: impl FnOnce(&LoopbackChain) -> T) -> Option<T> {
    let address = chain.reference().as_ptr() as usize;
    let live = CHAINS.lock();
    if !live.contains(&address) {
        return None;
    }
    // SAFETY: registered addresses point at live chains; the registry lock blocks destruction.
    Some(read(unsafe { &*(address as *const LoopbackChain) }))
}

fn with_mesh<T>(mesh: &Mesh, read: impl FnOnce(&LoopbackMesh) -> T) -> Option<T> {
    let address = mesh.reference().as_ptr() as usize;
    let live = MESHES.lock();
    if !live.contains(&address) {
        return None;
    }
    // SAFETY: as in `with_chain`.
    Some(read(unsafe { &*(address as *const LoopbackMesh) }))
}

/// Name the chain was created with.
pub fn chain_name(chain: &Chain) -> Option<String> {
    with_chain(chain, |chain| chain.name.clone())
}

/// Number of `freeExternalVariable` calls the chain has received.
pub fn external_frees(chain: &Chain) -> Option<usize> {
    with_chain(chain, |chain| chain.frees.load(Ordering::SeqCst))
}

/// Whether `name` is currently registered as an external variable of the chain.
pub fn is_registered(chain: &Chain, name: &str) -> Option<bool> {
    with_chain(chain, |chain| chain.externals.lock().contains_key(name))
}

/// Member count reported through the set's API table.
pub fn set_len(set: &Set) -> Option<u32> {
    let raw = set.raw();
    if !std::ptr::eq(raw.api, &SET_API as *const SetApi as *const std::ffi::c_void) {
        return None;
    }
    // SAFETY: the API table is ours, so `opaque` came from `set_new` and is still owned by `set`.
    Some(unsafe { (SET_API.count)(raw.opaque) })
}

/// Number of ticks the mesh has run.
pub fn ticks(mesh: &Mesh) -> Option<u64> {
    with_mesh(mesh, |mesh| mesh.ticks.load(Ordering::SeqCst))
}

/// Number of distinct chains scheduled on the mesh.
pub fn scheduled(mesh: &Mesh) -> Option<usize> {
    with_mesh(mesh, |mesh| mesh.scheduled.lock().len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::abi::{TypeInfo, TypesInfo, VarType};
    use crate::dispatch::Core;
    use crate::variant::Variant;

    #[test]
    fn every_slot_is_filled() {
        let loopback = Loopback::new();
        let table = unsafe { &*loopback.negotiate_version(ABI_VERSION) };
        for slot in Slot::ALL {
            assert!(loopback.resolve_slot(table, slot).is_some(), "missing {slot}");
        }
    }

    #[test]
    fn descriptor_entries_shift_elements() {
        let mut info = TypesInfo::empty();
        unsafe {
            entries::types_push(&mut info, &TypeInfo::new(VarType::INT));
            entries::types_push(&mut info, &TypeInfo::new(VarType::FLOAT));
            entries::types_insert(&mut info, 0, &TypeInfo::new(VarType::BOOL));
            assert_eq!(info.len, 3);
            assert_eq!((*info.elements).basic_type, VarType::BOOL);
            entries::types_slow_delete(&mut info, 0);
            assert_eq!((*info.elements).basic_type, VarType::INT);
            assert_eq!(entries::types_pop(&mut info).basic_type, VarType::FLOAT);
            entries::types_free(&mut info);
        }
        assert!(info.elements.is_null());
        assert_eq!(info.len, 0);
    }

    #[test]
    fn new_set_is_empty() {
        let core = Core::connect(Arc::new(Loopback::new()), ABI_VERSION).unwrap();
        let set = Set::new(&core).unwrap();
        assert_eq!(set_len(&set), Some(0));
    }

    #[test]
    fn destroy_skips_external_storage() {
        let mut var = Variant::default();
        var.set_int(9);
        var.set_flags(crate::abi::VarFlags::EXTERNAL);
        unsafe { entries::destroy_var(&mut var) };
        assert_eq!(var.as_int(), Some(9));
    }

    #[test]
    fn literal_evaluation() {
        let text = |code: &str| std::ffi::CString::new(code).unwrap();
        unsafe {
            let env = entries::script_create(text("demo").as_ptr());
            let mut out = Variant::default();
            assert_eq!(entries::script_eval(env, text(" 12 ").as_ptr(), &mut out), 1);
            assert_eq!(out.as_int(), Some(12));
            assert_eq!(entries::script_eval(env, text("\"hi\"").as_ptr(), &mut out), 1);
            assert_eq!(out.as_str(), Some("hi"));
            assert_eq!(entries::script_eval(env, text("(+ 1 2)").as_ptr(), &mut out), 0);
            assert_eq!(out.as_str(), Some("hi"));
            entries::destroy_var(&mut out);
            entries::script_destroy(env);
        }
    }
}
