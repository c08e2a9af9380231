//! Scoped save/restore of ambient device state
//!
//! Immediate-mode contexts are shared with the host renderer, so an encode
//! must leave every binding and toggle as it found it. [`StateGuard`] captures
//! the state on construction and puts it back when dropped, which covers the
//! success path, `?` early returns and unwinding alike.

/// A device whose ambient state can be captured and re-applied.
///
/// Stateless backends return `None` from [`snapshot_state`](Self::snapshot_state)
/// and never see a restore.
pub trait StatefulDevice {
    type SavedState;

    fn snapshot_state(&self) -> Option<Self::SavedState>;

    fn restore_state(&self, state: Self::SavedState);
}

/// Restores the captured device state when dropped.
///
/// Not reentrant: two live guards on the same context would restore in the
/// wrong order, so callers serialize encodes on a shared context.
#[must_use = "state is restored as soon as the guard is dropped"]
pub struct StateGuard<'a, D: StatefulDevice + ?Sized> {
    device: &'a D,
    saved: Option<D::SavedState>,
}

impl<'a, D: StatefulDevice + ?Sized> StateGuard<'a, D> {
    pub fn new(device: &'a D) -> Self {
        Self {
            device,
            saved: device.snapshot_state(),
        }
    }

    /// Whether anything was captured.
    pub fn is_active(&self) -> bool {
        self.saved.is_some()
    }
}

impl<D: StatefulDevice + ?Sized> Drop for StateGuard<'_, D> {
    fn drop(&mut self) {
        if let Some(state) = self.saved.take() {
            self.device.restore_state(state);
        }
    }
}
