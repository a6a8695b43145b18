//=============================================
// chainbridge/src/types_array.rs
//=============================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Growable descriptor array backed by runtime memory
// Objective: Bounds-checked indexing over a runtime-owned buffer whose
//            growth, shifting and release all go through native entries
//=============================================

use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::abi::{TypeInfo, TypesInfo};
use crate::dispatch::Core;
use crate::error::{BridgeError, BridgeResult};

//=============================================
// Section 1.0 - Array
//=============================================

/// Ordered sequence of [`TypeInfo`] descriptors.
///
/// The buffer belongs to the runtime. Every mutation is delegated to the matching native
/// entry point; the wrapper only validates indices and caches the element count.
pub struct TypesArray {
    raw: TypesInfo,
    len: usize,
    core: Arc<Core>,
}

// SAFETY: the buffer is only reached through `&self`/`&mut self`.
unsafe impl Send for TypesArray {}
unsafe impl Sync for TypesArray {}

impl TypesArray {
    pub fn new(core: &Arc<Core>) -> Self {
        Self {
            raw: TypesInfo::empty(),
            len: 0,
            core: core.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn at(&self, index: usize) -> BridgeResult<&TypeInfo> {
        self.as_slice()
            .get(index)
            .ok_or_else(|| BridgeError::out_of_range(index, self.len))
    }

    pub fn at_mut(&mut self, index: usize) -> BridgeResult<&mut TypeInfo> {
        let len = self.len;
        self.as_mut_slice()
            .get_mut(index)
            .ok_or_else(|| BridgeError::out_of_range(index, len))
    }

    pub fn as_slice(&self) -> &[TypeInfo] {
        if self.raw.elements.is_null() || self.len == 0 {
            return &[];
        }
        // SAFETY: the runtime keeps `len` initialized elements at `elements`.
        unsafe { std::slice::from_raw_parts(self.raw.elements, self.len) }
    }

    fn as_mut_slice(&mut self) -> &mut [TypeInfo] {
        if self.raw.elements.is_null() || self.len == 0 {
            return &mut [];
        }
        unsafe { std::slice::from_raw_parts_mut(self.raw.elements, self.len) }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TypeInfo> {
        self.as_slice().iter()
    }

    //=============================================
    // Section 2.0 - Mutation
    //=============================================

    pub fn push(&mut self, value: TypeInfo) -> BridgeResult<()> {
        let push = self.core.types_push()?;
        let expected = self.len + 1;
        unsafe { push(&mut self.raw, &value) };
        self.sync_len(expected);
        Ok(())
    }

    pub fn pop(&mut self) -> BridgeResult<TypeInfo> {
        if self.len == 0 {
            return Err(BridgeError::EmptyCollection);
        }
        let pop = self.core.types_pop()?;
        let expected = self.len - 1;
        let value = unsafe { pop(&mut self.raw) };
        self.sync_len(expected);
        Ok(value)
    }

    /// Inserts before `index`. `index == len` appends.
    pub fn insert(&mut self, index: usize, value: TypeInfo) -> BridgeResult<()> {
        if index > self.len {
            return Err(BridgeError::out_of_range(index, self.len));
        }
        if index == self.len {
            return self.push(value);
        }
        let insert = self.core.types_insert()?;
        let expected = self.len + 1;
        unsafe { insert(&mut self.raw, index as u32, &value) };
        self.sync_len(expected);
        Ok(())
    }

    /// Removes the element at `index`, keeping the order of the rest.
    pub fn remove_at(&mut self, index: usize) -> BridgeResult<()> {
        if index >= self.len {
            return Err(BridgeError::out_of_range(index, self.len));
        }
        let delete = self.core.types_slow_delete()?;
        let expected = self.len - 1;
        unsafe { delete(&mut self.raw, index as u32) };
        self.sync_len(expected);
        Ok(())
    }

    fn sync_len(&mut self, expected: usize) {
        self.len = self.raw.len as usize;
        debug_assert_eq!(self.len, expected, "runtime reported an unexpected descriptor count");
    }
}

impl<'a> IntoIterator for &'a TypesArray {
    type Item = &'a TypeInfo;
    type IntoIter = std::slice::Iter<'a, TypeInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Debug for TypesArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl Drop for TypesArray {
    fn drop(&mut self) {
        if self.raw.elements.is_null() {
            return;
        }
        match self.core.types_free() {
            Ok(free) => unsafe { free(&mut self.raw) },
            Err(err) => warn!(%err, "failed to release descriptor array"),
        }
    }
}

//=============================================
// Section 3.0 - Tests
//=============================================
