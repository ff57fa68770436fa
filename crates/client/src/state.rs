//! Observable connection state.

use std::{
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
};

use {tokio::sync::watch, tracing::warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    /// Whether `self → next` is a legal edge.
    ///
    /// Any state may drop straight to `Disconnected` (explicit disconnect or a
    /// fatal auth failure). A failed first handshake moves `Connecting` to
    /// `Reconnecting`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (_, Disconnected)
                | (Disconnected, Connecting)
                | (Connecting, Connected | Reconnecting)
                | (Connected, Reconnecting)
                | (Reconnecting, Connected)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Reconnecting => "RECONNECTING",
        };
        f.write_str(s)
    }
}

/// Single-writer cell for [`ConnectionState`].
///
/// Writers identify themselves by an attempt generation. Bumping the
/// generation (a newer `connect`/`disconnect`) makes every write from older
/// attempts a no-op, so only the latest attempt can move the state.
pub(crate) struct StateCell {
    tx: watch::Sender<ConnectionState>,
    generation: Mutex<u64>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            tx,
            generation: Mutex::new(0),
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    pub(crate) fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Start a new generation and force the state to `Disconnected`.
    /// Returns the new generation.
    pub(crate) fn reset(&self) -> u64 {
        let mut generation = self.lock();
        *generation += 1;
        self.tx.send_if_modified(|state| {
            let changed = *state != ConnectionState::Disconnected;
            *state = ConnectionState::Disconnected;
            changed
        });
        *generation
    }

    /// Apply `next` if `generation` is still current and the edge is legal.
    /// Returns whether the write was accepted.
    pub(crate) fn set(&self, generation: u64, next: ConnectionState) -> bool {
        let current = self.lock();
        if *current != generation {
            return false;
        }
        let mut accepted = true;
        self.tx.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            if !state.can_transition_to(next) {
                warn!(from = %state, to = %next, "rejected illegal connection state transition");
                accepted = false;
                return false;
            }
            *state = next;
            true
        });
        accepted
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        *self.lock() == generation
    }

    fn lock(&self) -> MutexGuard<'_, u64> {
        // A poisoned lock only means a writer panicked mid-update; the u64 is
        // still meaningful.
        self.generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_edges() {
        use ConnectionState::*;
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connecting.can_transition_to(Reconnecting));
        assert!(Connected.can_transition_to(Reconnecting));
        assert!(Reconnecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Disconnected));

        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Disconnected.can_transition_to(Reconnecting));
        assert!(!Connected.can_transition_to(Connecting));
        assert!(!Reconnecting.can_transition_to(Connecting));
    }

    #[test]
    fn stale_generation_cannot_write() {
        let cell = StateCell::new();
        let old = cell.reset();
        assert!(cell.set(old, ConnectionState::Connecting));

        let new = cell.reset();
        assert_eq!(cell.get(), ConnectionState::Disconnected);
        assert!(!cell.set(old, ConnectionState::Connecting));
        assert_eq!(cell.get(), ConnectionState::Disconnected);
        assert!(cell.set(new, ConnectionState::Connecting));
        assert_eq!(cell.get(), ConnectionState::Connecting);
    }

    #[test]
    fn illegal_edge_is_rejected() {
        let cell = StateCell::new();
        let generation = cell.reset();
        assert!(!cell.set(generation, ConnectionState::Connected));
        assert_eq!(cell.get(), ConnectionState::Disconnected);
    }

    #[test]
    fn display_uses_upper_case_names() {
        assert_eq!(ConnectionState::Reconnecting.to_string(), "RECONNECTING");
    }
}
