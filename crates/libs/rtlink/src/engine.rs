//! The Cache Coherence Engine: the reconciliation primitive and
//! the two paths that drive it — inbound kernel events and outbound commands.
//!
//! The engine owns the only mutable handle to the [`LinkCache`]. Every other
//! module either reads through it (`command.rs`) or feeds it observations
//! (`transport.rs`'s [`LinkEvent`](crate::transport::LinkEvent)s).

use crate::cache::LinkCache;
use crate::error::PlatformError;
use crate::object::Link;
use crate::signal::{Signal, SignalEmitter};
use crate::transport::{LinkEvent, LinkSource};

/// Compares cached state against a fresh kernel query and returns the signal
/// the difference implies, if any. This is the five-row reconciliation table:
///
/// | cached (`C`) | kernel (`K`) | outcome        |
/// |--------------|--------------|----------------|
/// | absent       | absent       | no signal      |
/// | absent       | present      | `LinkAdded`    |
/// | present      | present, =   | no signal      |
/// | present      | present, ≠   | `LinkChanged`  |
/// | present      | absent       | `LinkRemoved`  |
fn reconcile(cached: Option<&Link>, fresh: Option<&Link>) -> Option<Signal> {
    match (cached, fresh) {
        (None, None) => None,
        (None, Some(new_link)) => Some(Signal::LinkAdded(new_link.clone())),
        (Some(old_link), None) => Some(Signal::LinkRemoved(old_link.clone())),
        (Some(old_link), Some(new_link)) => {
            if old_link.observably_equal(new_link) {
                None
            } else {
                Some(Signal::LinkChanged(new_link.clone()))
            }
        }
    }
}

/// The Cache Coherence Engine: a cache, a kernel-query source, and a signal
/// emitter, wired together by the reconciliation primitive above.
///
/// `S` is the [`LinkSource`] the engine queries on every reconciliation —
/// production code supplies [`NetlinkTransport`](crate::transport::NetlinkTransport),
/// tests supply an in-memory fake.
pub struct CoherenceEngine<S: LinkSource> {
    source: S,
    cache: LinkCache,
    signals: SignalEmitter,
}

impl<S: LinkSource> CoherenceEngine<S> {
    pub fn new(source: S) -> Self {
        Self { source, cache: LinkCache::new(), signals: SignalEmitter::new() }
    }

    pub fn subscribe(&mut self, callback: impl FnMut(&Signal) + Send + 'static) {
        self.signals.subscribe(callback);
    }

    /// Seeds the cache from a full kernel enumeration. Run once at startup,
    /// before the event channel is read. No signals are emitted for the
    /// initial population: there is nothing upstream has seen yet to
    /// compare against.
    pub async fn seed(&mut self) -> Result<(), PlatformError> {
        for link in self.source.query_all().await? {
            self.cache.insert(link)?;
        }
        Ok(())
    }

    /// Reconciles a single ifindex against the kernel and applies whatever
    /// cache mutation and signal the comparison implies. This is the engine's
    /// only mutation path — both the event loop and `refresh` below funnel
    /// through it.
    async fn reconcile_index(&mut self, ifindex: u32) -> Result<(), PlatformError> {
        let cached = self.cache.lookup_by_index(ifindex).cloned();
        let fresh = self.source.query_by_index(ifindex).await?;

        let Some(signal) = reconcile(cached.as_ref(), fresh.as_ref()) else {
            return Ok(());
        };

        match (&cached, &fresh) {
            (None, Some(new_link)) => self.cache.insert(new_link.clone())?,
            (Some(_), Some(new_link)) => {
                self.cache.replace(ifindex, new_link.clone())?;
            }
            (Some(_), None) => {
                self.cache.remove(ifindex)?;
            }
            (None, None) => unreachable!("reconcile only returns Some(..) when state differs"),
        }

        self.signals.emit(signal);
        Ok(())
    }

    /// Handles one raw event-channel observation: re-query the kernel for
    /// the ifindex it names and reconcile — the event's own kind is
    /// advisory only, the engine always re-queries.
    ///
    /// Transient transport failures are logged and swallowed rather than
    /// propagated: a single dropped reconciliation does not bring the engine
    /// down, and the next event (or an explicit [`Self::refresh`]) will
    /// correct the cache. Cache invariant violations (a [`PlatformError::Internal`])
    /// are not swallowed — they indicate the cache and kernel have diverged
    /// in a way reconciliation cannot explain, and are returned to the
    /// caller as fatal.
    pub async fn handle_event(&mut self, event: LinkEvent) -> Result<(), PlatformError> {
        let LinkEvent::Touched { ifindex, .. } = event;
        match self.reconcile_index(ifindex).await {
            Ok(()) => Ok(()),
            Err(err @ PlatformError::Internal(_)) => Err(err),
            Err(err) => {
                log::warn!("coherence engine: dropping event for ifindex {ifindex}: {err}");
                Ok(())
            }
        }
    }

    /// Drains and handles a batch of events in order, stopping early (and
    /// propagating) on the first fatal error.
    pub async fn drain_events(&mut self, events: Vec<LinkEvent>) -> Result<(), PlatformError> {
        for event in events {
            self.handle_event(event).await?;
        }
        Ok(())
    }

    /// Forces a reconciliation of a single ifindex outside of the event
    /// path — used by the command surface after issuing a mutating request,
    /// since the kernel does not guarantee the resulting event is observed
    /// before the command returns.
    pub async fn refresh(&mut self, ifindex: u32) -> Result<(), PlatformError> {
        self.reconcile_index(ifindex).await
    }

    /// Same as [`Self::refresh`], but by name — used after a create, where
    /// the caller does not yet know the ifindex the kernel assigned.
    pub async fn refresh_by_name(&mut self, name: &str) -> Result<(), PlatformError> {
        let fresh = self.source.query_by_name(name).await?;
        match fresh {
            Some(link) => self.reconcile_index(link.ifindex).await,
            None => Ok(()),
        }
    }

    pub fn cache(&self) -> &LinkCache {
        &self.cache
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}
