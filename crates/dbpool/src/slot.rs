//! Raw connection bookkeeping.

use std::fmt;
use std::time::{Duration, Instant};

use crate::connection::{Connection, ConnectionId};

/// Lifecycle of one raw connection.
///
/// Transitions happen only inside the pool: `Idle -> CheckedOut` on acquire,
/// `CheckedOut -> Idle` on a healthy return, anything `-> Destroyed` once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionState {
    Idle,
    CheckedOut,
    Destroyed,
}

/// Why a raw connection left the pool for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DiscardReason {
    ProbeFailed,
    NativelyClosed,
    ResetFailed,
    PoolShutDown,
}

impl DiscardReason {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::ProbeFailed => "probe_failed",
            Self::NativelyClosed => "natively_closed",
            Self::ResetFailed => "reset_failed",
            Self::PoolShutDown => "pool_shut_down",
        }
    }
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) struct Slot<C> {
    pub(crate) id: ConnectionId,
    pub(crate) conn: C,
    state: ConnectionState,
    created_at: Instant,
}

impl<C> fmt::Debug for Slot<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("age", &self.created_at.elapsed())
            .finish_non_exhaustive()
    }
}

impl<C: Connection> Slot<C> {
    pub(crate) fn new(id: ConnectionId, conn: C) -> Self {
        Self {
            id,
            conn,
            state: ConnectionState::Idle,
            created_at: Instant::now(),
        }
    }

    pub(crate) const fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn check_out(&mut self) {
        debug_assert_eq!(self.state, ConnectionState::Idle);
        self.state = ConnectionState::CheckedOut;
    }

    pub(crate) fn check_in(&mut self) {
        debug_assert_eq!(self.state, ConnectionState::CheckedOut);
        self.state = ConnectionState::Idle;
    }

    /// `None` when the connection may be handed out or kept idle.
    pub(crate) fn health(&mut self, timeout: Duration) -> Option<DiscardReason> {
        if self.conn.is_closed() {
            Some(DiscardReason::NativelyClosed)
        } else if self.conn.is_valid(timeout) {
            None
        } else {
            Some(DiscardReason::ProbeFailed)
        }
    }

    /// Undo what the last borrower left open. `None` on success.
    pub(crate) fn reset(&mut self) -> Option<DiscardReason> {
        match self.conn.reset() {
            Ok(()) => None,
            Err(e) => {
                tracing::debug!(connection.id = %self.id, error = %e, "session reset failed");
                Some(DiscardReason::ResetFailed)
            }
        }
    }

    /// Close the physical connection.
    pub(crate) fn destroy(mut self) {
        debug_assert_ne!(self.state, ConnectionState::Destroyed);
        self.state = ConnectionState::Destroyed;
        if let Err(e) = self.conn.close() {
            tracing::debug!(connection.id = %self.id, error = %e, "native close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockConnection;

    #[test]
    fn test_slot_lifecycle() {
        let conn = MockConnection::standalone();
        let handle = conn.handle();
        let mut slot = Slot::new(handle.id(), conn);

        assert_eq!(slot.state(), ConnectionState::Idle);
        slot.check_out();
        assert_eq!(slot.state(), ConnectionState::CheckedOut);
        slot.check_in();
        assert_eq!(slot.state(), ConnectionState::Idle);

        slot.destroy();
        assert!(handle.is_natively_closed());
        assert_eq!(handle.native_close_count(), 1);
    }

    #[test]
    fn test_slot_health() {
        let conn = MockConnection::standalone();
        let handle = conn.handle();
        let mut slot = Slot::new(handle.id(), conn);
        let timeout = Duration::from_millis(10);

        assert_eq!(slot.health(timeout), None);
        handle.break_connection();
        assert_eq!(slot.health(timeout), Some(DiscardReason::ProbeFailed));
        handle.kill();
        assert_eq!(slot.health(timeout), Some(DiscardReason::NativelyClosed));
    }

    #[test]
    fn test_slot_reset_restores_auto_commit() {
        let mut conn = MockConnection::standalone();
        conn.set_auto_commit(false).unwrap();
        let handle = conn.handle();
        let mut slot = Slot::new(handle.id(), conn);

        assert_eq!(slot.reset(), None);
        assert!(slot.conn.auto_commit().unwrap());
        assert_eq!(handle.rollback_count(), 1);

        slot.conn.set_auto_commit(false).unwrap();
        handle.fail_reset();
        assert_eq!(slot.reset(), Some(DiscardReason::ResetFailed));
    }

    #[test]
    fn test_discard_reason_display() {
        assert_eq!(DiscardReason::ProbeFailed.to_string(), "probe_failed");
        assert_eq!(DiscardReason::PoolShutDown.as_str(), "pool_shut_down");
        assert_eq!(DiscardReason::ResetFailed.to_string(), "reset_failed");
    }
}
