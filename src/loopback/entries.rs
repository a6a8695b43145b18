//==============================================
// File: loopback/entries.rs
//==============================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: C ABI entry points of the in-process runtime
// Objective: Honour every slot signature with plain Rust allocations
//==============================================

use std::collections::{HashMap, HashSet};
use std::ffi::{c_char, c_void, CStr, CString};
use std::mem::ManuallyDrop;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::trace;

use crate::abi::{
    ChainRef, MeshRef, RawFn, RawSet, ScriptRef, TypeInfo, TypesInfo, VarFlags, VarType,
};
use crate::dispatch::*;
use crate::variant::{SeqView, StringView, Variant};

//==============================================
// Section 1.0 - Live object registries
//==============================================
// Addresses of chains and meshes handed out and not yet destroyed. Introspection helpers only
// dereference addresses found here.

pub(super) static CHAINS: Lazy<Mutex<HashSet<usize>>> = Lazy::new(|| Mutex::new(HashSet::new()));
pub(super) static MESHES: Lazy<Mutex<HashSet<usize>>> = Lazy::new(|| Mutex::new(HashSet::new()));

#[derive(Debug, Default)]
pub(super) struct LoopbackChain {
    pub(super) name: String,
    pub(super) externals: Mutex<HashMap<String, Box<Variant>>>,
    pub(super) frees: AtomicUsize,
}

#[derive(Debug, Default)]
pub(super) struct LoopbackMesh {
    pub(super) ticks: AtomicU64,
    pub(super) scheduled: Mutex<Vec<usize>>,
}

#[derive(Debug)]
struct LoopbackScript {
    path: String,
}

#[derive(Debug, Default)]
struct LoopbackSet {
    members: usize,
}

/// API table attached to every loopback set.
#[repr(C)]
pub(super) struct SetApi {
    pub(super) count: unsafe extern "C" fn(*mut c_void) -> u32,
}

pub(super) static SET_API: SetApi = SetApi { count: set_count };

unsafe fn text<'a>(ptr: *const c_char) -> Option<&'a CStr> {
    (!ptr.is_null()).then(|| CStr::from_ptr(ptr))
}

//==============================================
// Section 2.0 - Variants
//==============================================

unsafe fn deep_copy(src: &Variant) -> Variant {
    let mut out = Variant::default();
    out.set_types(src.type_tag(), src.inner_type());
    match src.type_tag() {
        VarType::STRING => {
            let bytes = src.as_bytes().unwrap_or_default();
            let mut owned = Vec::with_capacity(bytes.len() + 1);
            owned.extend_from_slice(bytes);
            owned.push(0);
            let owned = owned.into_boxed_slice();
            let cap = owned.len() as u32;
            out.payload.string = StringView {
                ptr: Box::into_raw(owned) as *mut u8 as *const c_char,
                len: bytes.len() as u32,
                cap,
            };
        }
        VarType::SEQ => {
            let items: Box<[Variant]> = src
                .as_seq()
                .unwrap_or_default()
                .iter()
                .map(|item| deep_copy(item))
                .collect();
            let len = items.len() as u32;
            out.payload.seq = SeqView {
                elements: Box::into_raw(items) as *mut Variant,
                len,
                cap: len,
            };
        }
        _ => out.payload = src.payload,
    }
    out
}

pub(super) unsafe extern "C" fn clone_var(dst: *mut Variant, src: *const Variant) {
    if dst.is_null() || src.is_null() || std::ptr::eq(dst, src) {
        return;
    }
    destroy_var(dst);
    std::ptr::write(dst, deep_copy(&*src));
}

pub(super) unsafe extern "C" fn destroy_var(var: *mut Variant) {
    let Some(var) = var.as_mut() else {
        return;
    };
    if var.flags().contains(VarFlags::EXTERNAL) {
        return;
    }
    match var.type_tag() {
        VarType::STRING => {
            let view = var.payload.string;
            if view.cap != 0 && !view.ptr.is_null() {
                let bytes =
                    std::ptr::slice_from_raw_parts_mut(view.ptr as *mut u8, view.cap as usize);
                drop(Box::from_raw(bytes));
            }
        }
        VarType::SEQ => {
            let view = var.payload.seq;
            if view.cap != 0 && !view.elements.is_null() {
                let items = std::ptr::slice_from_raw_parts_mut(view.elements, view.cap as usize);
                let mut items = Box::from_raw(items);
                for item in items.iter_mut() {
                    destroy_var(item);
                }
            }
        }
        _ => {}
    }
    *var = Variant::default();
}

//==============================================
// Section 3.0 - Descriptor arrays
//==============================================

unsafe fn take_vec(info: &mut TypesInfo) -> Vec<TypeInfo> {
    if info.elements.is_null() {
        return Vec::new();
    }
    Vec::from_raw_parts(info.elements, info.len as usize, info.cap as usize)
}

fn store_vec(info: &mut TypesInfo, vec: Vec<TypeInfo>) {
    if vec.capacity() == 0 {
        *info = TypesInfo::empty();
        return;
    }
    let mut vec = ManuallyDrop::new(vec);
    info.elements = vec.as_mut_ptr();
    info.len = vec.len() as u32;
    info.cap = vec.capacity() as u32;
}

pub(super) unsafe extern "C" fn types_push(info: *mut TypesInfo, value: *const TypeInfo) {
    let (Some(info), Some(value)) = (info.as_mut(), value.as_ref()) else {
        return;
    };
    let mut vec = take_vec(info);
    vec.push(*value);
    store_vec(info, vec);
}

pub(super) unsafe extern "C" fn types_pop(info: *mut TypesInfo) -> TypeInfo {
    let Some(info) = info.as_mut() else {
        return TypeInfo::default();
    };
    let mut vec = take_vec(info);
    let popped = vec.pop().unwrap_or_default();
    store_vec(info, vec);
    popped
}

pub(super) unsafe extern "C" fn types_insert(
    info: *mut TypesInfo,
    index: u32,
    value: *const TypeInfo,
) {
    let (Some(info), Some(value)) = (info.as_mut(), value.as_ref()) else {
        return;
    };
    let mut vec = take_vec(info);
    let index = (index as usize).min(vec.len());
    vec.insert(index, *value);
    store_vec(info, vec);
}

pub(super) unsafe extern "C" fn types_slow_delete(info: *mut TypesInfo, index: u32) {
    let Some(info) = info.as_mut() else {
        return;
    };
    let mut vec = take_vec(info);
    if (index as usize) < vec.len() {
        vec.remove(index as usize);
    }
    store_vec(info, vec);
}

pub(super) unsafe extern "C" fn types_free(info: *mut TypesInfo) {
    let Some(info) = info.as_mut() else {
        return;
    };
    drop(take_vec(info));
    *info = TypesInfo::empty();
}

//==============================================
// Section 4.0 - Sets
//==============================================

unsafe extern "C" fn set_count(set: *mut c_void) -> u32 {
    (set as *const LoopbackSet)
        .as_ref()
        .map_or(0, |set| set.members as u32)
}

pub(super) unsafe extern "C" fn set_new() -> RawSet {
    RawSet {
        opaque: Box::into_raw(Box::<LoopbackSet>::default()) as *mut c_void,
        api: &SET_API as *const SetApi as *const c_void,
    }
}

pub(super) unsafe extern "C" fn set_free(set: *mut RawSet) {
    let Some(set) = set.as_mut() else {
        return;
    };
    if !set.opaque.is_null() {
        drop(Box::from_raw(set.opaque as *mut LoopbackSet));
    }
    *set = RawSet::zeroed();
}

//==============================================
// Section 5.0 - Chains and external variables
//==============================================

pub(super) unsafe extern "C" fn create_chain(name: *const c_char) -> ChainRef {
    let name = text(name)
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let chain = Box::into_raw(Box::new(LoopbackChain {
        name,
        ..LoopbackChain::default()
    }));
    CHAINS.lock().insert(chain as usize);
    ChainRef(chain as *mut c_void)
}

pub(super) unsafe extern "C" fn destroy_chain(chain: ChainRef) {
    if CHAINS.lock().remove(&(chain.0 as usize)) {
        drop(Box::from_raw(chain.0 as *mut LoopbackChain));
    }
}

pub(super) unsafe extern "C" fn alloc_external_variable(
    chain: ChainRef,
    name: *const c_char,
) -> *mut Variant {
    let (Some(chain), Some(name)) = ((chain.0 as *const LoopbackChain).as_ref(), text(name)) else {
        return std::ptr::null_mut();
    };
    let mut externals = chain.externals.lock();
    let slot = externals
        .entry(name.to_string_lossy().into_owned())
        .or_insert_with(Box::default);
    let storage: *mut Variant = &mut **slot;
    storage
}

pub(super) unsafe extern "C" fn free_external_variable(chain: ChainRef, name: *const c_char) {
    let (Some(chain), Some(name)) = ((chain.0 as *const LoopbackChain).as_ref(), text(name)) else {
        return;
    };
    chain.frees.fetch_add(1, Ordering::SeqCst);
    chain.externals.lock().remove(&*name.to_string_lossy());
}

//==============================================
// Section 6.0 - Mesh
//==============================================

pub(super) unsafe extern "C" fn create_mesh() -> MeshRef {
    let mesh = Box::into_raw(Box::<LoopbackMesh>::default());
    MESHES.lock().insert(mesh as usize);
    MeshRef(mesh as *mut c_void)
}

pub(super) unsafe extern "C" fn destroy_mesh(mesh: MeshRef) {
    if MESHES.lock().remove(&(mesh.0 as usize)) {
        drop(Box::from_raw(mesh.0 as *mut LoopbackMesh));
    }
}

pub(super) unsafe extern "C" fn schedule(mesh: MeshRef, chain: ChainRef) {
    let Some(mesh) = (mesh.0 as *const LoopbackMesh).as_ref() else {
        return;
    };
    let mut scheduled = mesh.scheduled.lock();
    if !chain.is_null() && !scheduled.contains(&(chain.0 as usize)) {
        scheduled.push(chain.0 as usize);
    }
}

pub(super) unsafe extern "C" fn tick(mesh: MeshRef) -> bool {
    let Some(mesh) = (mesh.0 as *const LoopbackMesh).as_ref() else {
        return false;
    };
    mesh.ticks.fetch_add(1, Ordering::SeqCst);
    true
}

//==============================================
// Section 7.0 - Script environment
//==============================================
// Literal-only evaluator: integers, floats, true/false, nil and double-quoted strings.

pub(super) unsafe extern "C" fn script_create(path: *const c_char) -> ScriptRef {
    let path = text(path)
        .map(|path| path.to_string_lossy().into_owned())
        .unwrap_or_default();
    ScriptRef(Box::into_raw(Box::new(LoopbackScript { path })) as *mut c_void)
}

pub(super) unsafe extern "C" fn script_destroy(env: ScriptRef) {
    if !env.is_null() {
        drop(Box::from_raw(env.0 as *mut LoopbackScript));
    }
}

pub(super) unsafe extern "C" fn script_eval(
    env: ScriptRef,
    code: *const c_char,
    output: *mut Variant,
) -> u8 {
    let Some(script) = (env.0 as *const LoopbackScript).as_ref() else {
        return 0;
    };
    if output.is_null() {
        return 0;
    }
    let Some(code) = text(code).and_then(|code| code.to_str().ok()) else {
        return 0;
    };
    trace!(path = %script.path, code, "evaluating literal");
    let Some(value) = eval_literal(code.trim()) else {
        return 0;
    };
    destroy_var(output);
    std::ptr::write(output, value);
    1
}

unsafe fn eval_literal(code: &str) -> Option<Variant> {
    let mut out = Variant::default();
    match code {
        "nil" => {}
        "true" => out.set_bool(true),
        "false" => out.set_bool(false),
        _ if code.len() >= 2 && code.starts_with('"') && code.ends_with('"') => {
            let inner = CString::new(&code[1..code.len() - 1]).ok()?;
            return Some(deep_copy(&Variant::borrowed_str(&inner)));
        }
        _ => {
            if let Ok(value) = code.parse::<i64>() {
                out.set_int(value);
            } else {
                out.set_float(code.parse::<f64>().ok()?);
            }
        }
    }
    Some(out)
}

//==============================================
// Section 8.0 - Table
//==============================================

macro_rules! entry {
    ($func:ident as $ty:ty) => {
        // SAFETY: only the pointer type changes; callers transmute back to `$ty`.
        Some(unsafe { std::mem::transmute::<$ty, RawFn>($func as $ty) })
    };
}

pub(super) fn table() -> [Option<RawFn>; Slot::COUNT] {
    let mut slots: [Option<RawFn>; Slot::COUNT] = [None; Slot::COUNT];
    slots[Slot::SetNew.index()] = entry!(set_new as SetNewFn);
    slots[Slot::SetFree.index()] = entry!(set_free as SetFreeFn);
    slots[Slot::TypesPush.index()] = entry!(types_push as TypesPushFn);
    slots[Slot::TypesPop.index()] = entry!(types_pop as TypesPopFn);
    slots[Slot::TypesInsert.index()] = entry!(types_insert as TypesInsertFn);
    slots[Slot::TypesSlowDelete.index()] = entry!(types_slow_delete as TypesSlowDeleteFn);
    slots[Slot::TypesFree.index()] = entry!(types_free as TypesFreeFn);
    slots[Slot::CloneVar.index()] = entry!(clone_var as CloneVarFn);
    slots[Slot::DestroyVar.index()] = entry!(destroy_var as DestroyVarFn);
    slots[Slot::AllocExternalVariable.index()] =
        entry!(alloc_external_variable as AllocExternalVariableFn);
    slots[Slot::FreeExternalVariable.index()] =
        entry!(free_external_variable as FreeExternalVariableFn);
    slots[Slot::CreateChain.index()] = entry!(create_chain as CreateChainFn);
    slots[Slot::DestroyChain.index()] = entry!(destroy_chain as DestroyChainFn);
    slots[Slot::CreateMesh.index()] = entry!(create_mesh as CreateMeshFn);
    slots[Slot::DestroyMesh.index()] = entry!(destroy_mesh as DestroyMeshFn);
    slots[Slot::Schedule.index()] = entry!(schedule as ScheduleFn);
    slots[Slot::Tick.index()] = entry!(tick as TickFn);
    slots[Slot::ScriptCreate.index()] = entry!(script_create as ScriptCreateFn);
    slots[Slot::ScriptDestroy.index()] = entry!(script_destroy as ScriptDestroyFn);
    slots[Slot::ScriptEval.index()] = entry!(script_eval as ScriptEvalFn);
    slots
}

//==============================================
// End of file
//==============================================
