use std::collections::HashSet;
use std::ffi::CString;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::abi::ChainRef;
use crate::dispatch::Core;
use crate::error::{BridgeError, BridgeResult};

/// Owned native chain. External variables are registered under a chain and a name.
pub struct Chain {
    reference: ChainRef,
    name: String,
    core: Arc<Core>,
    /// Names with a live `ExternalVariable`. The runtime shares storage per name, so only one
    /// handle may own a key at a time.
    externals: Mutex<HashSet<CString>>,
}

// SAFETY: the runtime synchronizes access to chain internals; the handle itself is immutable.
unsafe impl Send for Chain {}
unsafe impl Sync for Chain {}

impl Chain {
    pub fn new(core: &Arc<Core>, name: &str) -> BridgeResult<Self> {
        let c_name = CString::new(name).map_err(|_| BridgeError::InvalidName(name.to_string()))?;
        let create = core.create_chain()?;
        let reference = unsafe { create(c_name.as_ptr()) };
        if reference.is_null() {
            return Err(BridgeError::AllocationFailed("chain"));
        }
        debug!(name, "chain created");
        Ok(Self {
            reference,
            name: name.to_string(),
            core: core.clone(),
            externals: Mutex::new(HashSet::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn reference(&self) -> ChainRef {
        self.reference
    }

    pub fn core(&self) -> &Arc<Core> {
        &self.core
    }

    /// Whether an external variable currently owns `name` on this chain.
    pub fn has_external(&self, name: &str) -> bool {
        CString::new(name).is_ok_and(|name| self.externals.lock().contains(&name))
    }

    pub(crate) fn externals(&self) -> &Mutex<HashSet<CString>> {
        &self.externals
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("name", &self.name)
            .field("reference", &self.reference)
            .finish()
    }
}

impl Drop for Chain {
    fn drop(&mut self) {
        match self.core.destroy_chain() {
            Ok(destroy) => unsafe { destroy(self.reference) },
            Err(err) => warn!(%err, chain = %self.name, "failed to destroy chain"),
        }
    }
}
