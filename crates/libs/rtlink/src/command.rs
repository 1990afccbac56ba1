//! The Command Surface: the API upstream callers actually use.
//! Queries read straight through the cache; mutations issue a kernel
//! request and then force a [`CoherenceEngine::refresh`] so the cache (and
//! any signal the change implies) is current before the call returns — the
//! caller never has to wait for the event channel to catch up.

use crate::config::Tunables;
use crate::engine::CoherenceEngine;
use crate::error::PlatformError;
use crate::object::{Link, LinkKind, IFF_NOARP, IFF_UP};
use crate::transport::LinkSource;

/// Thin facade over [`CoherenceEngine`] that also carries the tunables
/// governing which kinds are creatable.
pub struct CommandSurface<S: LinkSource> {
    engine: CoherenceEngine<S>,
    tunables: Tunables,
}

impl<S: LinkSource> CommandSurface<S> {
    pub fn new(engine: CoherenceEngine<S>, tunables: Tunables) -> Self {
        Self { engine, tunables }
    }

    pub fn engine(&self) -> &CoherenceEngine<S> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut CoherenceEngine<S> {
        &mut self.engine
    }

    pub fn enumerate_links(&self) -> Vec<Link> {
        self.engine.cache().enumerate()
    }

    pub fn find_by_index(&self, ifindex: u32) -> Option<Link> {
        self.engine.cache().lookup_by_index(ifindex).cloned()
    }

    pub fn find_by_name(&self, name: &str) -> Option<Link> {
        let ifindex = self.engine.cache().lookup_by_name(name)?;
        self.engine.cache().lookup_by_index(ifindex).cloned()
    }

    /// Looks up a cached link or fails with `NotFound` — the shared base
    /// the per-attribute query accessors and `delete` are built on.
    fn require(&self, ifindex: u32) -> Result<Link, PlatformError> {
        self.engine
            .cache()
            .lookup_by_index(ifindex)
            .cloned()
            .ok_or_else(|| PlatformError::not_found(format!("ifindex {ifindex}")))
    }

    pub fn name(&self, ifindex: u32) -> Result<String, PlatformError> {
        self.require(ifindex).map(|link| link.name)
    }

    pub fn kind(&self, ifindex: u32) -> Result<LinkKind, PlatformError> {
        self.require(ifindex).map(|link| link.kind)
    }

    pub fn is_up(&self, ifindex: u32) -> Result<bool, PlatformError> {
        self.require(ifindex).map(|link| link.up)
    }

    pub fn is_connected(&self, ifindex: u32) -> Result<bool, PlatformError> {
        self.require(ifindex).map(|link| link.connected)
    }

    pub fn uses_arp(&self, ifindex: u32) -> Result<bool, PlatformError> {
        self.require(ifindex).map(|link| link.arp)
    }

    /// Creates a link of `kind`, if `kind` is one of the tunables'
    /// creatable kinds, then refreshes the cache by name so the new link
    /// (and its `LinkAdded` signal) are visible before this call returns.
    pub async fn create(&mut self, name: &str, kind: LinkKind) -> Result<(), PlatformError> {
        if !self.tunables.can_create(kind) {
            return Err(PlatformError::invalid_argument(format!("kind {kind:?} is not creatable")));
        }
        self.engine.source().create(name, kind).await?;
        self.engine.refresh_by_name(name).await
    }

    /// Deletes a cached link. Unlike the transport's own `EEXIST`-is-success
    /// policy, deleting an ifindex this surface has never observed is an
    /// error upward rather than a silent no-op — there is no kernel
    /// round-trip to make until the cache confirms the ifindex exists.
    pub async fn delete(&mut self, ifindex: u32) -> Result<(), PlatformError> {
        self.require(ifindex)?;
        self.engine.source().delete(ifindex).await?;
        self.engine.refresh(ifindex).await
    }

    async fn set_flags(&mut self, ifindex: u32, set_mask: u32, clear_mask: u32) -> Result<(), PlatformError> {
        self.engine.source().set_flags(ifindex, set_mask, clear_mask).await?;
        self.engine.refresh(ifindex).await
    }

    pub async fn set_up(&mut self, ifindex: u32) -> Result<(), PlatformError> {
        self.set_flags(ifindex, IFF_UP, 0).await
    }

    pub async fn set_down(&mut self, ifindex: u32) -> Result<(), PlatformError> {
        self.set_flags(ifindex, 0, IFF_UP).await
    }

    pub async fn set_arp(&mut self, ifindex: u32) -> Result<(), PlatformError> {
        self.set_flags(ifindex, 0, IFF_NOARP).await
    }

    pub async fn set_noarp(&mut self, ifindex: u32) -> Result<(), PlatformError> {
        self.set_flags(ifindex, IFF_NOARP, 0).await
    }
}
