//! Exclusive backend connection, guarded by leadership.
//!
//! Exactly one tab holds the live backend connection at a time: the
//! leader. The guard couples the resource lifecycle to election
//! effects so that `BecameLeader` opens it and `SteppedDown` closes it
//! within the same event-loop tick, before any further leader-only
//! work can run.

use tandem_core::Epoch;

/// The side-effecting resource only the leader may hold (backend
/// socket, push channel, notification permit).
pub trait ExclusiveResource: Send {
    fn open(&mut self, epoch: Epoch);
    fn close(&mut self);
}

/// Couples an [`ExclusiveResource`] to the leadership lifecycle.
/// Transitions are idempotent; replayed election effects never
/// double-open or double-close.
pub struct ConnectionGuard {
    resource: Box<dyn ExclusiveResource>,
    open_epoch: Option<Epoch>,
}

impl ConnectionGuard {
    pub fn new(resource: Box<dyn ExclusiveResource>) -> Self {
        Self {
            resource,
            open_epoch: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open_epoch.is_some()
    }

    pub fn open_epoch(&self) -> Option<Epoch> {
        self.open_epoch
    }

    pub fn on_became_leader(&mut self, epoch: Epoch) {
        if self.open_epoch == Some(epoch) {
            return;
        }
        if self.open_epoch.is_some() {
            self.resource.close();
        }
        tracing::info!(epoch = %epoch, "opening exclusive backend connection");
        self.resource.open(epoch);
        self.open_epoch = Some(epoch);
    }

    pub fn on_stepped_down(&mut self) {
        if self.open_epoch.take().is_some() {
            tracing::info!("closing exclusive backend connection");
            self.resource.close();
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.open_epoch.take().is_some() {
            self.resource.close();
        }
    }
}

impl std::fmt::Debug for ConnectionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionGuard")
            .field("open_epoch", &self.open_epoch)
            .finish()
    }
}

/// Counting stand-in resource for tests and headless sessions. Clone
/// it before boxing to keep a probe on the counters.
#[derive(Debug, Clone, Default)]
pub struct NoopResource {
    opens: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    closes: std::sync::Arc<std::sync::atomic::AtomicUsize>,
}

impl NoopResource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(std::sync::atomic::Ordering::Acquire)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(std::sync::atomic::Ordering::Acquire)
    }
}

impl ExclusiveResource for NoopResource {
    fn open(&mut self, _epoch: Epoch) {
        self.opens.fetch_add(1, std::sync::atomic::Ordering::AcqRel);
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, std::sync::atomic::Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leadership_cycle_opens_then_closes_once() {
        let probe = NoopResource::new();
        let mut guard = ConnectionGuard::new(Box::new(probe.clone()));

        guard.on_became_leader(Epoch(3));
        guard.on_became_leader(Epoch(3)); // replayed effect
        assert!(guard.is_open());
        assert_eq!(probe.open_count(), 1);

        guard.on_stepped_down();
        guard.on_stepped_down();
        assert!(!guard.is_open());
        assert_eq!(probe.close_count(), 1);
    }

    #[test]
    fn new_epoch_cycles_the_connection() {
        let probe = NoopResource::new();
        let mut guard = ConnectionGuard::new(Box::new(probe.clone()));

        guard.on_became_leader(Epoch(1));
        guard.on_became_leader(Epoch(2));
        assert_eq!(guard.open_epoch(), Some(Epoch(2)));
        assert_eq!(probe.open_count(), 2);
        assert_eq!(probe.close_count(), 1);
    }

    #[test]
    fn drop_closes_an_open_connection() {
        let probe = NoopResource::new();
        {
            let mut guard = ConnectionGuard::new(Box::new(probe.clone()));
            guard.on_became_leader(Epoch(1));
        }
        assert_eq!(probe.close_count(), 1);
    }
}
