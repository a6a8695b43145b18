use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::abi::MeshRef;
use crate::chain::Chain;
use crate::dispatch::Core;
use crate::error::{BridgeError, BridgeResult};

/// Native scheduler. The host advances it once per frame with [`Mesh::tick`].
///
/// Scheduled chains are kept alive until the mesh is destroyed, so the runtime never ticks a
/// chain that has already been released.
#[derive(Debug)]
pub struct Mesh {
    reference: MeshRef,
    core: Arc<Core>,
    chains: Mutex<Vec<Arc<Chain>>>,
}

// SAFETY: the handle may move to the tick thread; calls on it are serialized through `&self`
// by the single owner.
unsafe impl Send for Mesh {}

impl Mesh {
    pub fn new(core: &Arc<Core>) -> BridgeResult<Self> {
        let create = core.create_mesh()?;
        let reference = unsafe { create() };
        if reference.is_null() {
            return Err(BridgeError::AllocationFailed("mesh"));
        }
        debug!("mesh created");
        Ok(Self {
            reference,
            core: core.clone(),
            chains: Mutex::new(Vec::new()),
        })
    }

    pub fn reference(&self) -> MeshRef {
        self.reference
    }

    /// Hands `chain` to the scheduler so later ticks advance it. Scheduling the same chain
    /// twice is a no-op.
    pub fn schedule(&self, chain: Arc<Chain>) -> BridgeResult<()> {
        let mut chains = self.chains.lock();
        if chains.iter().any(|known| Arc::ptr_eq(known, &chain)) {
            return Ok(());
        }
        let schedule = self.core.schedule()?;
        unsafe { schedule(self.reference, chain.reference()) };
        debug!(chain = chain.name(), "chain scheduled");
        chains.push(chain);
        Ok(())
    }

    pub fn scheduled_len(&self) -> usize {
        self.chains.lock().len()
    }

    /// Runs one scheduler step. Returns the runtime's success flag.
    pub fn tick(&self) -> BridgeResult<bool> {
        let tick = self.core.tick()?;
        Ok(unsafe { tick(self.reference) })
    }
}

// Chains are released by the field drop that follows, after the mesh is gone.
impl Drop for Mesh {
    fn drop(&mut self) {
        match self.core.destroy_mesh() {
            Ok(destroy) => unsafe { destroy(self.reference) },
            Err(err) => warn!(%err, "failed to destroy mesh"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::ABI_VERSION;
    use crate::loopback::{self, Loopback};

    fn core() -> Arc<Core> {
        Core::connect(Arc::new(Loopback::new()), ABI_VERSION).expect("connect")
    }

    #[test]
    fn ticks_accumulate() {
        let core = core();
        let mesh = Mesh::new(&core).expect("mesh");
        let chain = Arc::new(Chain::new(&core, "main").expect("chain"));
        mesh.schedule(chain.clone()).expect("schedule");
        mesh.schedule(chain).expect("schedule twice");
        for _ in 0..3 {
            assert!(mesh.tick().expect("tick"));
        }
        assert_eq!(loopback::ticks(&mesh), Some(3));
        assert_eq!(loopback::scheduled(&mesh), Some(1));
        assert_eq!(mesh.scheduled_len(), 1);
    }

    #[test]
    fn scheduled_chain_outlives_caller_handle() {
        let core = core();
        let mesh = Mesh::new(&core).expect("mesh");
        let chain = Arc::new(Chain::new(&core, "held").expect("chain"));
        let weak = Arc::downgrade(&chain);
        mesh.schedule(chain).expect("schedule");

        let held = weak.upgrade().expect("kept alive by the mesh");
        assert_eq!(loopback::chain_name(&held).as_deref(), Some("held"));
        drop(held);
        assert!(mesh.tick().expect("tick"));

        drop(mesh);
        assert!(weak.upgrade().is_none());
    }
}
