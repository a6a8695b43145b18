//! Runtime loaded from a shared library.
//!
//! The library must export `chainblocksInterface(u32) -> *const NativeTable`. Entries missing
//! from the table are looked up as exported symbols under their [`Slot::symbol`] name, which is
//! how the scripting entry points (`cbLispCreate`, `cbLispDestroy`, `cbLispEval`) ship.

use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};
use tracing::{debug, warn};

use crate::abi::{NativeTable, RawFn};
use crate::capability::NativeLibrary;
use crate::dispatch::Slot;
use crate::error::{BridgeError, BridgeResult};

type InterfaceFn = unsafe extern "C" fn(u32) -> *const NativeTable;

const INTERFACE_SYMBOL: &[u8] = b"chainblocksInterface\0";

/// A native runtime opened with `dlopen`/`LoadLibrary`.
pub struct DylibLibrary {
    library: Library,
    path: PathBuf,
}

impl DylibLibrary {
    pub fn open(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let path = path.as_ref().to_path_buf();
        // SAFETY: loading runs the library's initializers; callers choose which library to trust.
        let library = unsafe { Library::new(&path) }
            .map_err(|err| BridgeError::Library(format!("{}: {err}", path.display())))?;
        debug!(path = %path.display(), "native library loaded");
        Ok(Self { library, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

unsafe impl NativeLibrary for DylibLibrary {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn negotiate_version(&self, version: u32) -> *const NativeTable {
        let interface: Symbol<InterfaceFn> = match unsafe { self.library.get(INTERFACE_SYMBOL) } {
            Ok(symbol) => symbol,
            Err(err) => {
                warn!(%err, path = %self.path.display(), "library exports no capability table");
                return std::ptr::null();
            }
        };
        unsafe { interface(version) }
    }

    fn resolve_slot(&self, table: &NativeTable, slot: Slot) -> Option<RawFn> {
        table.entry(slot.index()).or_else(|| {
            let mut name = slot.symbol().as_bytes().to_vec();
            name.push(0);
            // SAFETY: the symbol stays valid while `self.library` is loaded, and the capability
            // holding this library keeps it alive for every resolved entry.
            let symbol: Symbol<RawFn> = unsafe { self.library.get(&name) }.ok()?;
            Some(*symbol)
        })
    }
}
