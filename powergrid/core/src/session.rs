//! Active Session Tracking
//!
//! Detects who (if anyone) owns the interactive console. "No session" is
//! itself a valid state: the login screen, or a headless boot. The tracker
//! stores the last observed identity and fires exactly one transition per
//! change; observing the same identity twice is a no-op, which keeps
//! spurious wakeups from triggering redundant safety resets.
//!
//! The concrete OS integration (who is on the console, watch signals) is
//! an external collaborator behind [`SessionSource`]; the daemon drives the
//! tracker with a debounced watch signal plus a periodic poll fallback.

use std::path::PathBuf;

/// The active interactive session.
///
/// Created whole on every detected change, never partially updated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    /// Unix uid of the console user
    pub uid: u32,
    /// Login name, when resolvable
    pub username: String,
    /// Home directory, when resolvable
    pub home_dir: PathBuf,
}

/// Provider of the current console session identity.
pub trait SessionSource: Send + Sync {
    /// Who currently owns the console, or `None` at the login screen.
    fn current(&self) -> anyhow::Result<Option<Session>>;
}

/// A fired session transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionChange {
    /// A user took the console (fresh login or user switch)
    SignedIn(Session),
    /// The console returned to the login screen
    SignedOut,
}

/// Compares observed identities against the stored one and fires
/// transitions only on change.
#[derive(Debug, Default)]
pub struct SessionTracker {
    current: Option<Session>,
    primed: bool,
}

impl SessionTracker {
    /// Tracker that has not observed anything yet. The first observation
    /// always fires, so startup applies the correct state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The identity from the last fired transition.
    #[must_use]
    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    /// Feed a freshly read identity. Returns a change iff it differs from
    /// the stored one (by uid); identical identities never re-fire.
    pub fn observe(&mut self, now: Option<Session>) -> Option<SessionChange> {
        let same = self.primed
            && match (&self.current, &now) {
                (None, None) => true,
                (Some(prev), Some(next)) => prev.uid == next.uid,
                _ => false,
            };
        if same {
            return None;
        }

        self.primed = true;
        self.current = now.clone();
        Some(match now {
            Some(session) => SessionChange::SignedIn(session),
            None => SessionChange::SignedOut,
        })
    }
}
