//=============================================
// chainbridge/src/external.rs
//=============================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Named variables living in chain-owned native storage
// Objective: Register storage under a chain, expose it while live and
//            release it exactly once however many callers dispose it
//=============================================

use std::ffi::CString;
use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU8, Ordering};

use tracing::{debug, warn};

use crate::abi::{VarFlags, VarType};
use crate::chain::Chain;
use crate::error::{BridgeError, BridgeResult};
use crate::variant::{Variable, Variant};

const LIVE: u8 = 0;
const DISPOSED: u8 = 1;

//=============================================
// Section 1.0 - External variable
//=============================================

/// A variant whose storage is allocated and owned by a chain.
///
/// The storage carries [`VarFlags::EXTERNAL`], so value destruction never frees it. Only
/// [`ExternalVariable::dispose`] (or drop) hands it back, and only the first call does so.
pub struct ExternalVariable<'c> {
    chain: &'c Chain,
    name: CString,
    storage: AtomicPtr<Variant>,
    state: AtomicU8,
}

impl<'c> ExternalVariable<'c> {
    pub fn create(
        chain: &'c Chain,
        name: &str,
        value_type: VarType,
        inner_type: VarType,
    ) -> BridgeResult<Self> {
        let c_name = CString::new(name).map_err(|_| BridgeError::InvalidName(name.to_string()))?;
        let alloc = chain.core().alloc_external_variable()?;
        // Held until the name is recorded so a concurrent create cannot share the storage.
        let mut live = chain.externals().lock();
        if live.contains(&c_name) {
            return Err(BridgeError::NameInUse {
                name: name.to_string(),
            });
        }
        let storage = unsafe { alloc(chain.reference(), c_name.as_ptr()) };
        // SAFETY: non-null storage stays valid until `freeExternalVariable` for this name.
        let Some(var) = (unsafe { storage.as_mut() }) else {
            return Err(BridgeError::AllocationFailed("external variable"));
        };
        var.set_types(value_type, inner_type);
        var.set_flags(VarFlags::EXTERNAL);
        live.insert(c_name.clone());
        drop(live);
        debug!(chain = chain.name(), name, %value_type, "external variable registered");
        Ok(Self {
            chain,
            name: c_name,
            storage: AtomicPtr::new(storage),
            state: AtomicU8::new(LIVE),
        })
    }

    pub fn name(&self) -> &str {
        self.name.to_str().unwrap_or_default()
    }

    pub fn chain(&self) -> &'c Chain {
        self.chain
    }

    pub fn is_disposed(&self) -> bool {
        self.state.load(Ordering::Acquire) == DISPOSED
    }

    /// Mutable access to the native storage.
    pub fn value(&mut self) -> BridgeResult<&mut Variant> {
        let storage = *self.storage.get_mut();
        if *self.state.get_mut() == DISPOSED || storage.is_null() {
            return Err(BridgeError::UseAfterDispose {
                name: self.name().to_string(),
            });
        }
        Ok(unsafe { &mut *storage })
    }

    /// Independent, locally owned deep copy of the current value.
    pub fn clone_value(&mut self) -> BridgeResult<Variable> {
        let core = self.chain.core().clone();
        let var = self.value()?;
        core.clone_var(var)
    }

    /// Returns the storage to the chain. Later calls, concurrent or not, do nothing.
    pub fn dispose(&self) -> BridgeResult<()> {
        let free = self.chain.core().free_external_variable()?;
        if self
            .state
            .compare_exchange(LIVE, DISPOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }
        self.storage.store(ptr::null_mut(), Ordering::Release);
        // The name is only released once the runtime has freed its storage.
        let mut live = self.chain.externals().lock();
        unsafe { free(self.chain.reference(), self.name.as_ptr()) };
        live.remove(&self.name);
        drop(live);
        debug!(chain = self.chain.name(), name = self.name(), "external variable released");
        Ok(())
    }
}

impl fmt::Debug for ExternalVariable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalVariable")
            .field("chain", &self.chain.name())
            .field("name", &self.name())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Drop for ExternalVariable<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.dispose() {
            warn!(%err, name = self.name(), "failed to release external variable");
        }
    }
}

//=============================================
// Section 2.0 - Tests
//=============================================
