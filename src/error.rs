use thiserror::Error;

use crate::dispatch::Slot;

/// Result type used across the bridge.
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("{what} accessed before initialization")]
    UninitializedAccess { what: &'static str },
    #[error("native runtime rejected ABI version {requested:#010x}")]
    UnsupportedVersion { requested: u32 },
    #[error("native table has no entry for slot {slot}")]
    UnknownSlot { slot: Slot },
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("collection is empty")]
    EmptyCollection,
    #[error("external variable `{name}` used after dispose")]
    UseAfterDispose { name: String },
    #[error("external variable `{name}` is already registered on this chain")]
    NameInUse { name: String },
    #[error("string contains an interior nul byte: {0:?}")]
    InvalidName(String),
    #[error("native runtime returned no storage for {0}")]
    AllocationFailed(&'static str),
    #[error("script evaluation failed: {code}")]
    ScriptFailed { code: String },
    #[error("failed to load native library: {0}")]
    Library(String),
}

impl BridgeError {
    /// Out-of-range error for an access at `index` into a collection of `len` elements.
    pub fn out_of_range(index: usize, len: usize) -> Self {
        BridgeError::IndexOutOfRange { index, len }
    }
}
