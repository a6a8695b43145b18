//! ABI version negotiation with the native runtime.

use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use tracing::debug;

use crate::abi::{NativeTable, RawFn};
use crate::dispatch::Slot;
use crate::error::{BridgeError, BridgeResult};

/// Provider of the native runtime's two bootstrap calls.
///
/// # Safety
/// A non-null table returned by [`negotiate_version`](NativeLibrary::negotiate_version) must stay
/// valid and unchanged for as long as the library value is alive, and every entry it exposes must
/// have the C signature documented for its [`Slot`].
pub unsafe trait NativeLibrary: Send + Sync {
    /// Human readable name used in logs.
    fn describe(&self) -> String;

    /// Returns the capability table for `version`, or null when the version is unsupported.
    fn negotiate_version(&self, version: u32) -> *const NativeTable;

    /// Looks up the entry point for `slot` inside a negotiated table.
    fn resolve_slot(&self, table: &NativeTable, slot: Slot) -> Option<RawFn> {
        table.entry(slot.index())
    }
}

/// Opaque token for a negotiated table.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CapabilityHandle(NonNull<NativeTable>);

// SAFETY: the table behind the handle is immutable for the lifetime of its library.
unsafe impl Send for CapabilityHandle {}
unsafe impl Sync for CapabilityHandle {}

impl CapabilityHandle {
    pub fn as_ptr(&self) -> *const NativeTable {
        self.0.as_ptr()
    }
}

impl fmt::Debug for CapabilityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CapabilityHandle({:p})", self.0.as_ptr())
    }
}

/// A negotiated connection: the library that produced the table and the handle to it.
#[derive(Clone)]
pub struct Capability {
    library: Arc<dyn NativeLibrary>,
    handle: CapabilityHandle,
    version: u32,
}

impl Capability {
    pub fn handle(&self) -> CapabilityHandle {
        self.handle
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn library(&self) -> &Arc<dyn NativeLibrary> {
        &self.library
    }

    pub fn table(&self) -> &NativeTable {
        // SAFETY: `self.library` keeps the table alive (see `NativeLibrary` contract).
        unsafe { self.handle.0.as_ref() }
    }

    /// Asks the library for `slot`; no caching happens here.
    pub fn lookup(&self, slot: Slot) -> Option<RawFn> {
        self.library.resolve_slot(self.table(), slot)
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("library", &self.library.describe())
            .field("handle", &self.handle)
            .field("version", &format_args!("{:#010x}", self.version))
            .finish()
    }
}

/// Negotiates `version` with `library`.
///
/// A null table, or one stamped with another version, is reported as
/// [`BridgeError::UnsupportedVersion`].
pub fn resolve(library: Arc<dyn NativeLibrary>, version: u32) -> BridgeResult<Capability> {
    let raw = library.negotiate_version(version);
    let Some(table) = NonNull::new(raw as *mut NativeTable) else {
        return Err(BridgeError::UnsupportedVersion { requested: version });
    };
    // SAFETY: non-null tables are valid per the `NativeLibrary` contract.
    let stamped = unsafe { table.as_ref().abi_version() };
    if stamped != version {
        return Err(BridgeError::UnsupportedVersion { requested: version });
    }
    debug!(library = %library.describe(), version, "capability table negotiated");
    Ok(Capability {
        library,
        handle: CapabilityHandle(table),
        version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::ABI_VERSION;
    use crate::loopback::Loopback;

    #[test]
    fn rejects_unknown_version() {
        let err = resolve(Arc::new(Loopback::new()), 7).unwrap_err();
        assert_eq!(err, BridgeError::UnsupportedVersion { requested: 7 });
    }

    #[test]
    fn repeated_resolution_yields_equivalent_handles() {
        let library: Arc<dyn NativeLibrary> = Arc::new(Loopback::new());
        let first = resolve(library.clone(), ABI_VERSION).expect("first");
        let second = resolve(library, ABI_VERSION).expect("second");
        assert_eq!(first.handle(), second.handle());
        assert_eq!(first.table().abi_version(), ABI_VERSION);
    }
}
