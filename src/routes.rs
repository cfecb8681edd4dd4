use crate::models::Role;
use crate::session::{AuthPhase, SessionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Login,
    FirstRunSetup,
    Loading,
    ServiceUnavailable,
    Dashboard,
    Evaluate,
    Reports,
    Settings,
    Students,
    Professors,
}

impl View {
    pub const DEFAULT: View = View::Dashboard;

    pub fn requires_admin(self) -> bool {
        matches!(self, View::Students | View::Professors)
    }

    fn is_public(self) -> bool {
        matches!(
            self,
            View::Login | View::FirstRunSetup | View::Loading | View::ServiceUnavailable
        )
    }
}

/// Capability check consulted by [`resolve`]. `None` means no signed-in profile.
pub fn can_access(role: Option<Role>, view: View) -> bool {
    if view.is_public() {
        return true;
    }
    match role {
        None => false,
        Some(Role::Admin) => true,
        Some(Role::Professor) => !view.requires_admin(),
    }
}

/// Picks the view actually shown for `requested` in the given session state.
pub fn resolve(state: &SessionState, requested: View) -> View {
    match state {
        SessionState::Initializing | SessionState::Authenticated(AuthPhase::Loading { .. }) => {
            View::Loading
        }
        SessionState::ServiceUnavailable { .. } => View::ServiceUnavailable,
        SessionState::FirstRunSetup => View::FirstRunSetup,
        SessionState::Unauthenticated => View::Login,
        SessionState::Authenticated(AuthPhase::Ready(_)) => {
            let role = state.role();
            if requested.is_public() {
                View::DEFAULT
            } else if can_access(role, requested) {
                requested
            } else {
                tracing::debug!(requested = ?requested, role = ?role, "redirecting to dashboard");
                View::DEFAULT
            }
        }
    }
}
