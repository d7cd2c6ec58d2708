//! Exclusive ownership of the physical USB session.
//!
//! The serial link and the DFU engine both claim the USB bus but must never
//! run concurrently against the same device. Instead of leaving that as a
//! convention for the caller, each real connection path acquires this token
//! before touching hardware and holds it for the lifetime of the session.

use std::sync::atomic::{AtomicBool, Ordering};

static SESSION_HELD: AtomicBool = AtomicBool::new(false);

/// Proof that the holder owns the USB session.
///
/// At most one token exists at a time; it is released when dropped.
#[derive(Debug)]
pub struct SessionToken {
    _priv: (),
}

impl SessionToken {
    /// Claim the session. Returns `None` while another session is active.
    pub fn acquire() -> Option<SessionToken> {
        SESSION_HELD
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| SessionToken { _priv: () })
    }
}

impl Drop for SessionToken {
    fn drop(&mut self) {
        SESSION_HELD.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Single test: the token is process-global state, so the full
    // acquire/conflict/release cycle has to run in one sequence.
    #[test]
    fn test_session_is_exclusive_and_released_on_drop() {
        let token = SessionToken::acquire().expect("first acquire");
        assert!(SessionToken::acquire().is_none());

        drop(token);

        let token = SessionToken::acquire().expect("acquire after release");
        assert!(SessionToken::acquire().is_none());
        drop(token);
    }
}
