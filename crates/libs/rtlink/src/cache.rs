//! The Link Cache: an indexed mirror of kernel link state, keyed by
//! ifindex with a secondary name index. All mutation is restricted to the
//! Coherence Engine; everything else only reads.

use std::collections::HashMap;

use crate::error::PlatformError;
use crate::object::Link;

pub struct LinkCache {
    by_index: HashMap<u32, Link>,
    index_by_name: HashMap<String, u32>,
}

impl LinkCache {
    pub fn new() -> Self {
        Self { by_index: HashMap::new(), index_by_name: HashMap::new() }
    }

    pub fn lookup_by_index(&self, ifindex: u32) -> Option<&Link> {
        self.by_index.get(&ifindex)
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<u32> {
        self.index_by_name.get(name).copied()
    }

    /// Inserts a new cache entry. Fails if `ifindex` is already present —
    /// this is a cache invariant violation, never
    /// expected at runtime, so it surfaces as [`PlatformError::Internal`]
    /// rather than a recoverable condition.
    pub fn insert(&mut self, link: Link) -> Result<(), PlatformError> {
        if self.by_index.contains_key(&link.ifindex) {
            return Err(PlatformError::internal(format!(
                "cache insert: ifindex {} already present",
                link.ifindex
            )));
        }
        self.index_by_name.insert(link.name.clone(), link.ifindex);
        self.by_index.insert(link.ifindex, link);
        Ok(())
    }

    /// Removes a cache entry. Fails if `ifindex` is unknown.
    pub fn remove(&mut self, ifindex: u32) -> Result<Link, PlatformError> {
        let link = self
            .by_index
            .remove(&ifindex)
            .ok_or_else(|| PlatformError::internal(format!("cache remove: unknown ifindex {ifindex}")))?;
        self.index_by_name.remove(&link.name);
        Ok(link)
    }

    /// Atomic remove+insert at the same ifindex. The replacement's ifindex
    /// must match `ifindex`; if its name changed, the name index is updated
    /// along with it.
    pub fn replace(&mut self, ifindex: u32, link: Link) -> Result<Link, PlatformError> {
        if link.ifindex != ifindex {
            return Err(PlatformError::internal(format!(
                "cache replace: ifindex mismatch ({} vs {})",
                ifindex, link.ifindex
            )));
        }
        let previous = self
            .by_index
            .remove(&ifindex)
            .ok_or_else(|| PlatformError::internal(format!("cache replace: unknown ifindex {ifindex}")))?;
        self.index_by_name.remove(&previous.name);
        self.index_by_name.insert(link.name.clone(), link.ifindex);
        self.by_index.insert(ifindex, link);
        Ok(previous)
    }

    /// All cached links, in a stable order (sorted by ifindex) for a given
    /// cache state.
    pub fn enumerate(&self) -> Vec<Link> {
        let mut links: Vec<Link> = self.by_index.values().cloned().collect();
        links.sort_by_key(|link| link.ifindex);
        links
    }

    pub fn len(&self) -> usize {
        self.by_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }
}

impl Default for LinkCache {
    fn default() -> Self {
        Self::new()
    }
}
