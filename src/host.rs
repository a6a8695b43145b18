//=============================================
// chainbridge/src/host.rs
//=============================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Host-side lifecycle around one runtime connection
// Objective: Bring up the script environment and scheduler once, then
//            advance the scheduler one step per frame
//=============================================

use std::sync::Arc;

use once_cell::unsync::OnceCell;
use tracing::{info, instrument};

use crate::capability::NativeLibrary;
use crate::config::BridgeConfig;
use crate::dispatch::Core;
use crate::error::{BridgeError, BridgeResult};
use crate::mesh::Mesh;
use crate::script::ScriptEnv;

//=============================================
// Section 1.0 - Host
//=============================================

/// A connected runtime with its script environment and scheduler.
#[derive(Debug)]
pub struct Host {
    env: ScriptEnv,
    mesh: Mesh,
    core: Arc<Core>,
}

impl Host {
    #[instrument(skip_all, fields(library = %library.describe()))]
    pub fn start(library: Arc<dyn NativeLibrary>, config: &BridgeConfig) -> BridgeResult<Self> {
        let core = Core::connect(library, config.abi_version)?;
        let env = ScriptEnv::new(&core, &config.script_path)?;
        let mesh = Mesh::new(&core)?;
        info!(version = config.abi_version, script_path = %config.script_path, "host started");
        Ok(Self { env, mesh, core })
    }

    pub fn core(&self) -> &Arc<Core> {
        &self.core
    }

    pub fn env(&self) -> &ScriptEnv {
        &self.env
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    /// Runs one scheduler step.
    pub fn advance(&self) -> BridgeResult<bool> {
        self.mesh.tick()
    }
}

//=============================================
// Section 2.0 - Lazily started host
//=============================================

/// Holds a host that is started on first use. Accessors fail until it has been started.
#[derive(Debug, Default)]
pub struct HostCell {
    inner: OnceCell<Host>,
}

impl HostCell {
    pub const fn new() -> Self {
        Self {
            inner: OnceCell::new(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.get().is_some()
    }

    pub fn get(&self) -> BridgeResult<&Host> {
        self.inner
            .get()
            .ok_or(BridgeError::UninitializedAccess { what: "host" })
    }

    /// Starts the host with `start` unless one is already running.
    pub fn get_or_try_init<F>(&self, start: F) -> BridgeResult<&Host>
    where
        F: FnOnce() -> BridgeResult<Host>,
    {
        self.inner.get_or_try_init(start)
    }

    pub fn env(&self) -> BridgeResult<&ScriptEnv> {
        self.inner
            .get()
            .map(Host::env)
            .ok_or(BridgeError::UninitializedAccess { what: "script environment" })
    }

    pub fn mesh(&self) -> BridgeResult<&Mesh> {
        self.inner
            .get()
            .map(Host::mesh)
            .ok_or(BridgeError::UninitializedAccess { what: "mesh" })
    }

    /// Advances the running host. Fails if it was never started.
    pub fn advance(&self) -> BridgeResult<bool> {
        self.mesh()?.tick()
    }
}

//=============================================
// Section 3.0 - Tests
//=============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::{self, Loopback};

    fn start() -> BridgeResult<Host> {
        Host::start(Arc::new(Loopback::new()), &BridgeConfig::default())
    }

    #[test]
    fn accessors_fail_before_start() {
        let cell = HostCell::new();
        assert!(!cell.is_initialized());
        assert_eq!(
            cell.mesh().unwrap_err(),
            BridgeError::UninitializedAccess { what: "mesh" }
        );
        assert!(cell.advance().is_err());
    }

    #[test]
    fn starts_once() {
        let cell = HostCell::new();
        cell.get_or_try_init(start).expect("start");
        cell.get_or_try_init(|| panic!("started twice")).expect("cached");
        assert!(cell.advance().expect("advance"));
        let mesh = cell.mesh().expect("mesh");
        assert_eq!(loopback::ticks(mesh), Some(1));
    }

    #[test]
    fn failed_start_leaves_cell_empty() {
        let cell = HostCell::new();
        let config = BridgeConfig {
            abi_version: 1,
            ..BridgeConfig::default()
        };
        let err = cell
            .get_or_try_init(|| Host::start(Arc::new(Loopback::new()), &config))
            .unwrap_err();
        assert_eq!(err, BridgeError::UnsupportedVersion { requested: 1 });
        assert!(!cell.is_initialized());
    }
}
