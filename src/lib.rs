//! chainbridge – the host side of a native automation runtime's C boundary.
//!
//! The crate exposes these building blocks:
//!
//! * [`capability`] – version negotiation that yields the runtime's capability table.
//! * [`dispatch`] – [`Core`], which resolves each table entry once and caches it for every
//!   later call.
//! * [`variant`] – the tagged [`Variant`] value and the locally owned [`Variable`].
//! * [`types_array`], [`set`] and [`external`] – safe handles over runtime-owned descriptor
//!   buffers, sets and chain-owned variables.
//! * [`chain`], [`mesh`], [`script`] and [`host`] – the objects a host drives each frame.
//! * [`loopback`] – an in-process runtime, and `dylib` (feature `dylib`) for shared libraries.
//!
//! Everything that crosses the boundary goes through the cached entries of a [`Core`]; the
//! wrappers never touch native memory except through them.

pub mod abi;
pub mod capability;
pub mod chain;
pub mod config;
pub mod dispatch;
#[cfg(feature = "dylib")]
pub mod dylib;
pub mod error;
pub mod external;
pub mod host;
pub mod logging;
pub mod loopback;
pub mod mesh;
pub mod script;
pub mod set;
pub mod types_array;
pub mod variant;

pub use abi::{
    ChainRef, MeshRef, NativeTable, RawSet, ScriptRef, TypeInfo, TypesInfo, VarFlags, VarType,
    ABI_VERSION,
};
pub use capability::{resolve, Capability, CapabilityHandle, NativeLibrary};
pub use chain::Chain;
pub use config::BridgeConfig;
pub use dispatch::{Core, Slot};
#[cfg(feature = "dylib")]
pub use dylib::DylibLibrary;
pub use error::{BridgeError, BridgeResult};
pub use external::ExternalVariable;
pub use host::{Host, HostCell};
pub use loopback::Loopback;
pub use mesh::Mesh;
pub use script::ScriptEnv;
pub use set::Set;
pub use types_array::TypesArray;
pub use variant::{Variable, Variant};
