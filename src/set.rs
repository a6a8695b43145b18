use std::sync::Arc;

use tracing::warn;

use crate::abi::RawSet;
use crate::dispatch::Core;
use crate::error::BridgeResult;

/// Native set handle pairing the set pointer with its API table.
#[derive(Debug)]
pub struct Set {
    raw: RawSet,
    core: Arc<Core>,
}

// SAFETY: the set is only reached through its owner.
unsafe impl Send for Set {}

impl Set {
    pub fn new(core: &Arc<Core>) -> BridgeResult<Self> {
        let new = core.set_new()?;
        let raw = unsafe { new() };
        Ok(Self {
            raw,
            core: core.clone(),
        })
    }

    /// True when the runtime attached an API table. No native call is made.
    pub fn is_valid(&self) -> bool {
        self.raw.is_valid()
    }

    pub fn raw(&self) -> &RawSet {
        &self.raw
    }
}

impl Drop for Set {
    fn drop(&mut self) {
        if !self.raw.is_valid() {
            return;
        }
        match self.core.set_free() {
            Ok(free) => unsafe { free(&mut self.raw) },
            Err(err) => warn!(%err, "failed to release set"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::ABI_VERSION;
    use crate::dispatch::Slot;
    use crate::error::BridgeError;
    use crate::loopback::Loopback;

    #[test]
    fn created_set_is_valid() {
        let core = Core::connect(Arc::new(Loopback::new()), ABI_VERSION).expect("connect");
        let set = Set::new(&core).expect("set");
        assert!(set.is_valid());
    }

    #[test]
    fn missing_constructor_is_reported() {
        let core = Core::connect(Arc::new(Loopback::with_missing(&[Slot::SetNew])), ABI_VERSION)
            .expect("connect");
        assert_eq!(
            Set::new(&core).unwrap_err(),
            BridgeError::UnknownSlot { slot: Slot::SetNew }
        );
    }
}
