//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::debug::Debug;
use crate::packet::attribute::{
    AsPath, Attrs, BaseAttrs, ClusterList, Comms, ExtComms,
};
use crate::packet::error::AsPathError;

// Shared handle to an interned value.
//
// Handles are ordered and compared by their table index first, so two
// handles are equal only when they point to the same interned entry.
#[derive(Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct AttrSet<T> {
    pub index: u64,
    pub value: T,
}

// Intern table for one kind of attribute value.
#[derive(Debug)]
pub struct AttrSets<T> {
    tree: BTreeMap<T, AttrEntry<T>>,
    next_index: u64,
}

#[derive(Debug)]
struct AttrEntry<T> {
    set: Arc<AttrSet<T>>,
    refcnt: u32,
}

// Interned attribute record.
//
// Sub-objects are referenced through their own interned handles, so two
// records are equal only if they share the very same sub-objects.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct AttrRecord {
    pub base: BaseAttrs,
    pub as_path: Arc<AttrSet<AsPath>>,
    pub comm: Option<Arc<AttrSet<Comms>>>,
    pub ext_comm: Option<Arc<AttrSet<ExtComms>>>,
    pub cluster_list: Option<Arc<AttrSet<ClusterList>>>,
}

// Attribute handle held by RIB entries.
pub type RouteAttrs = Arc<AttrSet<AttrRecord>>;

// Intern tables for all attribute kinds.
#[derive(Debug)]
pub struct AttrStore {
    pub as_path: AttrSets<AsPath>,
    pub comm: AttrSets<Comms>,
    pub ext_comm: AttrSets<ExtComms>,
    pub cluster_list: AttrSets<ClusterList>,
    pub records: AttrSets<AttrRecord>,
    // Canonical empty AS_PATH, pinned for the lifetime of the store.
    empty_as_path: Arc<AttrSet<AsPath>>,
}

// ===== impl AttrSets =====

impl<T> AttrSets<T>
where
    T: Clone + Ord,
{
    // Returns the interned handle for the given value, taking a reference.
    pub fn intern(&mut self, value: &T) -> Arc<AttrSet<T>> {
        self.intern_check(value).0
    }

    // Same as `intern`, additionally telling whether a new entry was
    // created.
    fn intern_check(&mut self, value: &T) -> (Arc<AttrSet<T>>, bool) {
        if let Some(entry) = self.tree.get_mut(value) {
            entry.refcnt += 1;
            return (Arc::clone(&entry.set), false);
        }

        self.next_index += 1;
        let set = Arc::new(AttrSet {
            index: self.next_index,
            value: value.clone(),
        });
        self.tree.insert(
            value.clone(),
            AttrEntry {
                set: Arc::clone(&set),
                refcnt: 1,
            },
        );
        (set, true)
    }

    // Takes an additional reference to an interned value.
    pub fn acquire(&mut self, handle: &Arc<AttrSet<T>>) {
        match self.tree.get_mut(&handle.value) {
            Some(entry) if entry.set.index == handle.index => {
                entry.refcnt += 1;
            }
            _ => invariant_violation("acquire of unknown handle"),
        }
    }

    // Drops one reference, removing the entry when the last one goes away.
    //
    // Returns whether the entry was removed.
    pub fn release(&mut self, handle: &Arc<AttrSet<T>>) -> bool {
        let Some(entry) = self.tree.get_mut(&handle.value) else {
            invariant_violation("release of unknown handle");
            return false;
        };
        if entry.set.index != handle.index || entry.refcnt == 0 {
            invariant_violation("release of stale handle");
            return false;
        }

        entry.refcnt -= 1;
        if entry.refcnt == 0 {
            self.tree.remove(&handle.value);
            return true;
        }
        false
    }

    // Returns the number of references to an interned value (zero when the
    // handle isn't interned).
    pub fn refcount(&self, handle: &Arc<AttrSet<T>>) -> u32 {
        self.tree
            .get(&handle.value)
            .filter(|entry| entry.set.index == handle.index)
            .map_or(0, |entry| entry.refcnt)
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

impl<T> Default for AttrSets<T> {
    fn default() -> AttrSets<T> {
        AttrSets {
            tree: Default::default(),
            next_index: 0,
        }
    }
}

// ===== impl AttrRecord =====

impl AttrRecord {
    // Returns the plain, owned form of the record.
    pub fn get(&self) -> Attrs {
        Attrs {
            base: self.base,
            as_path: self.as_path.value.clone(),
            comm: self.comm.as_ref().map(|set| set.value.clone()),
            ext_comm: self.ext_comm.as_ref().map(|set| set.value.clone()),
            cluster_list: self
                .cluster_list
                .as_ref()
                .map(|set| set.value.clone()),
        }
    }
}

// ===== impl AttrStore =====

impl AttrStore {
    pub fn new() -> AttrStore {
        let mut as_path = AttrSets::default();
        let empty_as_path = as_path.intern(&AsPath::default());
        AttrStore {
            as_path,
            comm: Default::default(),
            ext_comm: Default::default(),
            cluster_list: Default::default(),
            records: Default::default(),
            empty_as_path,
        }
    }

    // Returns the canonical empty AS_PATH handle.
    pub fn empty_as_path(&self) -> &Arc<AttrSet<AsPath>> {
        &self.empty_as_path
    }

    // Parses an AS_PATH from wire bytes and interns it.
    //
    // Nothing is interned if the AS_PATH is malformed.
    pub fn as_path_parse(
        &mut self,
        buf: &mut Bytes,
    ) -> Result<Arc<AttrSet<AsPath>>, AsPathError> {
        let as_path = AsPath::decode(buf)?;
        Ok(self.as_path.intern(&as_path))
    }

    // Releases an AS_PATH handle obtained from `as_path_parse`.
    pub fn as_path_release(&mut self, handle: &Arc<AttrSet<AsPath>>) {
        self.as_path.release(handle);
    }

    // Interns a whole attribute record, taking one reference to it.
    pub fn intern(&mut self, attrs: &Attrs) -> RouteAttrs {
        let record = AttrRecord {
            base: attrs.base,
            as_path: self.as_path.intern(&attrs.as_path),
            comm: attrs.comm.as_ref().map(|comm| self.comm.intern(comm)),
            ext_comm: attrs
                .ext_comm
                .as_ref()
                .map(|ext_comm| self.ext_comm.intern(ext_comm)),
            cluster_list: attrs
                .cluster_list
                .as_ref()
                .map(|cluster_list| self.cluster_list.intern(cluster_list)),
        };

        let (handle, created) = self.records.intern_check(&record);
        if !created {
            // The existing record already holds its sub-objects.
            self.release_subsets(&record);
        }
        Debug::AttrIntern(handle.index, created).log();
        handle
    }

    // Takes an additional reference to an interned record.
    pub fn acquire(&mut self, handle: &RouteAttrs) {
        self.records.acquire(handle);
    }

    // Drops one reference to an interned record, releasing its sub-objects
    // once the record itself goes away.
    pub fn release(&mut self, handle: &RouteAttrs) {
        if self.records.release(handle) {
            Debug::AttrRelease(handle.index).log();
            self.release_subsets(&handle.value);
        }
    }

    pub fn refcount(&self, handle: &RouteAttrs) -> u32 {
        self.records.refcount(handle)
    }

    // Returns the plain, owned form of an interned record.
    pub fn get(&self, handle: &RouteAttrs) -> Attrs {
        handle.value.get()
    }

    fn release_subsets(&mut self, record: &AttrRecord) {
        self.as_path.release(&record.as_path);
        if let Some(comm) = &record.comm {
            self.comm.release(comm);
        }
        if let Some(ext_comm) = &record.ext_comm {
            self.ext_comm.release(ext_comm);
        }
        if let Some(cluster_list) = &record.cluster_list {
            self.cluster_list.release(cluster_list);
        }
    }
}

impl Default for AttrStore {
    fn default() -> AttrStore {
        AttrStore::new()
    }
}

// ===== helper functions =====

fn invariant_violation(msg: &str) {
    error!("attribute store: {}", msg);
    debug_assert!(false, "attribute store: {msg}");
}

// ===== unit tests =====
