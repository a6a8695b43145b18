//! Lazily bound native entry points.
//!
//! [`Core`] is the context object every wrapper holds on to. It owns the negotiated
//! [`Capability`] and resolves each [`Slot`] at most once, caching the function pointer behind a
//! [`OnceCell`] so concurrent first calls cannot race.

use std::ffi::c_char;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::debug;

use crate::abi::{ChainRef, MeshRef, RawFn, RawSet, ScriptRef, TypeInfo, TypesInfo};
use crate::capability::{self, Capability, NativeLibrary};
use crate::error::{BridgeError, BridgeResult};
use crate::variant::Variant;

/// Entry points of the capability table, in table order.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    SetNew = 0,
    SetFree = 1,
    TypesPush = 2,
    TypesPop = 3,
    TypesInsert = 4,
    TypesSlowDelete = 5,
    TypesFree = 6,
    CloneVar = 7,
    DestroyVar = 8,
    AllocExternalVariable = 9,
    FreeExternalVariable = 10,
    CreateChain = 11,
    DestroyChain = 12,
    CreateMesh = 13,
    DestroyMesh = 14,
    Schedule = 15,
    Tick = 16,
    ScriptCreate = 17,
    ScriptDestroy = 18,
    ScriptEval = 19,
}

impl Slot {
    pub const COUNT: usize = 20;

    pub const ALL: [Slot; Slot::COUNT] = [
        Slot::SetNew,
        Slot::SetFree,
        Slot::TypesPush,
        Slot::TypesPop,
        Slot::TypesInsert,
        Slot::TypesSlowDelete,
        Slot::TypesFree,
        Slot::CloneVar,
        Slot::DestroyVar,
        Slot::AllocExternalVariable,
        Slot::FreeExternalVariable,
        Slot::CreateChain,
        Slot::DestroyChain,
        Slot::CreateMesh,
        Slot::DestroyMesh,
        Slot::Schedule,
        Slot::Tick,
        Slot::ScriptCreate,
        Slot::ScriptDestroy,
        Slot::ScriptEval,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Exported symbol name of the entry point in the native library.
    pub fn symbol(self) -> &'static str {
        match self {
            Slot::SetNew => "setNew",
            Slot::SetFree => "setFree",
            Slot::TypesPush => "typesPush",
            Slot::TypesPop => "typesPop",
            Slot::TypesInsert => "typesInsert",
            Slot::TypesSlowDelete => "typesSlowDelete",
            Slot::TypesFree => "typesFree",
            Slot::CloneVar => "cloneVar",
            Slot::DestroyVar => "destroyVar",
            Slot::AllocExternalVariable => "allocExternalVariable",
            Slot::FreeExternalVariable => "freeExternalVariable",
            Slot::CreateChain => "createChain",
            Slot::DestroyChain => "destroyChain",
            Slot::CreateMesh => "createMesh",
            Slot::DestroyMesh => "destroyMesh",
            Slot::Schedule => "schedule",
            Slot::Tick => "tick",
            Slot::ScriptCreate => "cbLispCreate",
            Slot::ScriptDestroy => "cbLispDestroy",
            Slot::ScriptEval => "cbLispEval",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

pub type SetNewFn = unsafe extern "C" fn() -> RawSet;
pub type SetFreeFn = unsafe extern "C" fn(*mut RawSet);
pub type TypesPushFn = unsafe extern "C" fn(*mut TypesInfo, *const TypeInfo);
pub type TypesPopFn = unsafe extern "C" fn(*mut TypesInfo) -> TypeInfo;
pub type TypesInsertFn = unsafe extern "C" fn(*mut TypesInfo, u32, *const TypeInfo);
pub type TypesSlowDeleteFn = unsafe extern "C" fn(*mut TypesInfo, u32);
pub type TypesFreeFn = unsafe extern "C" fn(*mut TypesInfo);
pub type CloneVarFn = unsafe extern "C" fn(*mut Variant, *const Variant);
pub type DestroyVarFn = unsafe extern "C" fn(*mut Variant);
pub type AllocExternalVariableFn = unsafe extern "C" fn(ChainRef, *const c_char) -> *mut Variant;
pub type FreeExternalVariableFn = unsafe extern "C" fn(ChainRef, *const c_char);
pub type CreateChainFn = unsafe extern "C" fn(*const c_char) -> ChainRef;
pub type DestroyChainFn = unsafe extern "C" fn(ChainRef);
pub type CreateMeshFn = unsafe extern "C" fn() -> MeshRef;
pub type DestroyMeshFn = unsafe extern "C" fn(MeshRef);
pub type ScheduleFn = unsafe extern "C" fn(MeshRef, ChainRef);
pub type TickFn = unsafe extern "C" fn(MeshRef) -> bool;
pub type ScriptCreateFn = unsafe extern "C" fn(*const c_char) -> ScriptRef;
pub type ScriptDestroyFn = unsafe extern "C" fn(ScriptRef);
pub type ScriptEvalFn = unsafe extern "C" fn(ScriptRef, *const c_char, *mut Variant) -> u8;

/// Negotiated capability plus the per-slot binding cache.
pub struct Core {
    capability: Capability,
    slots: [OnceCell<RawFn>; Slot::COUNT],
}

impl Core {
    pub fn new(capability: Capability) -> Self {
        Self {
            capability,
            slots: std::array::from_fn(|_| OnceCell::new()),
        }
    }

    /// Negotiates `version` and wraps the result in a shareable context.
    pub fn connect(library: Arc<dyn NativeLibrary>, version: u32) -> BridgeResult<Arc<Self>> {
        let capability = capability::resolve(library, version)?;
        Ok(Arc::new(Self::new(capability)))
    }

    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    /// Returns the entry point for `slot`, querying the native table only the first time.
    pub fn resolve_slot(&self, slot: Slot) -> BridgeResult<RawFn> {
        self.slots[slot.index()]
            .get_or_try_init(|| {
                let resolved = self
                    .capability
                    .lookup(slot)
                    .ok_or(BridgeError::UnknownSlot { slot })?;
                debug!(%slot, "native entry point bound");
                Ok(resolved)
            })
            .copied()
    }

    /// Number of slots bound so far.
    pub fn resolved_slots(&self) -> usize {
        self.slots.iter().filter(|cell| cell.get().is_some()).count()
    }
}

impl fmt::Debug for Core {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Core")
            .field("capability", &self.capability)
            .field("resolved_slots", &self.resolved_slots())
            .finish()
    }
}

macro_rules! typed_slots {
    ($($(#[$meta:meta])* fn $method:ident => $slot:ident as $ty:ty;)*) => {
        impl Core {
            $(
                $(#[$meta])*
                pub(crate) fn $method(&self) -> BridgeResult<$ty> {
                    let raw = self.resolve_slot(Slot::$slot)?;
                    // SAFETY: the `NativeLibrary` contract fixes the signature of every slot.
                    Ok(unsafe { std::mem::transmute::<RawFn, $ty>(raw) })
                }
            )*
        }
    };
}

typed_slots! {
    fn set_new => SetNew as SetNewFn;
    fn set_free => SetFree as SetFreeFn;
    fn types_push => TypesPush as TypesPushFn;
    fn types_pop => TypesPop as TypesPopFn;
    fn types_insert => TypesInsert as TypesInsertFn;
    fn types_slow_delete => TypesSlowDelete as TypesSlowDeleteFn;
    fn types_free => TypesFree as TypesFreeFn;
    fn clone_var_fn => CloneVar as CloneVarFn;
    fn destroy_var => DestroyVar as DestroyVarFn;
    fn alloc_external_variable => AllocExternalVariable as AllocExternalVariableFn;
    fn free_external_variable => FreeExternalVariable as FreeExternalVariableFn;
    fn create_chain => CreateChain as CreateChainFn;
    fn destroy_chain => DestroyChain as DestroyChainFn;
    fn create_mesh => CreateMesh as CreateMeshFn;
    fn destroy_mesh => DestroyMesh as DestroyMeshFn;
    fn schedule => Schedule as ScheduleFn;
    fn tick => Tick as TickFn;
    fn script_create => ScriptCreate as ScriptCreateFn;
    fn script_destroy => ScriptDestroy as ScriptDestroyFn;
    fn script_eval => ScriptEval as ScriptEvalFn;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{NativeTable, ABI_VERSION};
    use crate::loopback::Loopback;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    struct CountingLibrary {
        inner: Loopback,
        lookups: AtomicUsize,
    }

    unsafe impl NativeLibrary for CountingLibrary {
        fn describe(&self) -> String {
            "counting".into()
        }

        fn negotiate_version(&self, version: u32) -> *const NativeTable {
            self.inner.negotiate_version(version)
        }

        fn resolve_slot(&self, table: &NativeTable, slot: Slot) -> Option<RawFn> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.inner.resolve_slot(table, slot)
        }
    }

    #[test]
    fn slot_order_matches_discriminants() {
        for (index, slot) in Slot::ALL.iter().enumerate() {
            assert_eq!(slot.index(), index);
        }
    }

    #[test]
    fn resolves_each_slot_once() {
        let library = Arc::new(CountingLibrary {
            inner: Loopback::new(),
            lookups: AtomicUsize::new(0),
        });
        let core = Core::connect(library.clone(), ABI_VERSION).expect("connect");
        let first = core.resolve_slot(Slot::TypesPush).expect("first");
        let second = core.resolve_slot(Slot::TypesPush).expect("second");
        assert_eq!(first as usize, second as usize);
        assert_eq!(library.lookups.load(Ordering::SeqCst), 1);
        assert_eq!(core.resolved_slots(), 1);
    }

    #[test]
    fn concurrent_first_resolution_queries_once() {
        let library = Arc::new(CountingLibrary {
            inner: Loopback::new(),
            lookups: AtomicUsize::new(0),
        });
        let core = Core::connect(library.clone(), ABI_VERSION).expect("connect");
        thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| core.resolve_slot(Slot::CloneVar).expect("resolve"));
            }
        });
        assert_eq!(library.lookups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_entry_is_unknown_slot() {
        let library = Arc::new(Loopback::with_missing(&[Slot::ScriptEval]));
        let core = Core::connect(library, ABI_VERSION).expect("connect");
        assert_eq!(
            core.resolve_slot(Slot::ScriptEval).unwrap_err(),
            BridgeError::UnknownSlot {
                slot: Slot::ScriptEval
            }
        );
        assert!(core.resolve_slot(Slot::ScriptCreate).is_ok());
    }
}
