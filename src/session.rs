use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{BootstrapError, GatewayError, SessionError};
use crate::gateway::{provision_professor, ProfileStore};
use crate::identity::{IdentityProvider, Principal};
use crate::models::{Professor, Role};
use crate::subscription::Subscription;
use crate::validation;

pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// The acting professor, handed explicitly to every view that needs it.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub professor: Professor,
}

impl Session {
    pub fn role(&self) -> Role {
        self.professor.role
    }

    pub fn is_admin(&self) -> bool {
        self.professor.is_admin()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthPhase {
    /// Signed in, profile record not received yet.
    Loading { principal: Uuid },
    Ready(Session),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Initializing,
    FirstRunSetup,
    Unauthenticated,
    Authenticated(AuthPhase),
    ServiceUnavailable { reason: String },
}

impl SessionState {
    pub fn session(&self) -> Option<&Session> {
        match self {
            SessionState::Authenticated(AuthPhase::Ready(session)) => Some(session),
            _ => None,
        }
    }

    pub fn role(&self) -> Option<Role> {
        self.session().map(Session::role)
    }

    /// False while a transition is still in flight.
    pub fn is_settled(&self) -> bool {
        !matches!(
            self,
            SessionState::Initializing | SessionState::Authenticated(AuthPhase::Loading { .. })
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Initializing => "initializing",
            SessionState::FirstRunSetup => "first-run-setup",
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::Authenticated(AuthPhase::Loading { .. }) => "authenticated/loading",
            SessionState::Authenticated(AuthPhase::Ready(_)) => "authenticated/ready",
            SessionState::ServiceUnavailable { .. } => "service-unavailable",
        }
    }
}

/// Current state for readers, plus every transition in order for waiters.
#[derive(Clone)]
struct StatePublisher {
    current: Arc<watch::Sender<SessionState>>,
    transitions: broadcast::Sender<SessionState>,
}

impl StatePublisher {
    fn new() -> Self {
        let (current, _) = watch::channel(SessionState::Initializing);
        let (transitions, _) = broadcast::channel(64);
        Self {
            current: Arc::new(current),
            transitions,
        }
    }

    fn publish(&self, state: SessionState) {
        tracing::debug!(state = state.label(), "session transition");
        self.current.send_replace(state.clone());
        // No receivers simply means nobody is waiting on a transition.
        let _ = self.transitions.send(state);
    }

    fn get(&self) -> SessionState {
        self.current.borrow().clone()
    }
}

/// Owns the session lifecycle: first-run detection, the identity listener,
/// the profile subscription of the signed-in principal, and recovery.
pub struct SessionGuard {
    identity: Arc<dyn IdentityProvider>,
    profiles: Arc<dyn ProfileStore>,
    publisher: StatePublisher,
    listener: Option<JoinHandle<()>>,
}

impl SessionGuard {
    pub fn new(identity: Arc<dyn IdentityProvider>, profiles: Arc<dyn ProfileStore>) -> Self {
        Self {
            identity,
            profiles,
            publisher: StatePublisher::new(),
            listener: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.publisher.get()
    }

    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.publisher.current.subscribe()
    }

    pub fn transitions(&self) -> broadcast::Receiver<SessionState> {
        self.publisher.transitions.subscribe()
    }

    /// Runs the start-up sequence from scratch.
    pub async fn initialize(&mut self) {
        self.stop_listener();
        self.publisher.publish(SessionState::Initializing);

        match self.profiles.has_any_profile().await {
            Ok(false) => {
                tracing::info!("no profile records found, entering first-run setup");
                self.publisher.publish(SessionState::FirstRunSetup);
            }
            Ok(true) => {
                let listener = AuthListener {
                    identity: Arc::clone(&self.identity),
                    profiles: Arc::clone(&self.profiles),
                    publisher: self.publisher.clone(),
                };
                self.listener = Some(tokio::spawn(listener.run()));
            }
            Err(err) => {
                tracing::warn!(error = %err, "initial profile check failed");
                self.publisher.publish(SessionState::ServiceUnavailable {
                    reason: err.to_string(),
                });
            }
        }
    }

    /// Waits until no transition is in flight and returns the resulting state.
    pub async fn settled(&self, timeout: Duration) -> Result<SessionState, SessionError> {
        let mut current = self.watch();
        let waited = tokio::time::timeout(timeout, current.wait_for(SessionState::is_settled)).await;
        match waited {
            Ok(Ok(state)) => Ok(state.clone()),
            Ok(Err(_)) | Err(_) => Err(SessionError::Timeout),
        }
    }

    /// Re-runs initialisation. Only valid while the service is unavailable.
    pub async fn retry(&mut self) -> Result<(), SessionError> {
        if !matches!(self.state(), SessionState::ServiceUnavailable { .. }) {
            return Err(SessionError::RetryNotAvailable);
        }
        tracing::info!("retrying session initialisation");
        self.initialize().await;
        Ok(())
    }

    /// Signs in and waits for the profile record to arrive.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Session, SessionError> {
        let state = self.state();
        if !matches!(
            state,
            SessionState::Unauthenticated | SessionState::Authenticated(_)
        ) {
            return Err(SessionError::LoginUnavailable(state.label()));
        }

        let mut transitions = self.transitions();
        let principal = self
            .identity
            .sign_in(email, password)
            .await
            .map_err(SessionError::SignIn)?;

        let outcome = tokio::time::timeout(timeout, async move {
            let mut seen_loading = false;
            loop {
                match transitions.recv().await {
                    Ok(SessionState::Authenticated(AuthPhase::Loading { principal: id }))
                        if id == principal.id =>
                    {
                        seen_loading = true;
                    }
                    Ok(SessionState::Authenticated(AuthPhase::Ready(session)))
                        if session.professor.id == principal.id =>
                    {
                        return Ok(session);
                    }
                    Ok(SessionState::Unauthenticated) if seen_loading => {
                        return Err(SessionError::ProfileMissing);
                    }
                    Ok(SessionState::ServiceUnavailable { reason }) => {
                        return Err(SessionError::ServiceUnavailable(reason));
                    }
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return Err(SessionError::Timeout),
                }
            }
        })
        .await;

        outcome.unwrap_or(Err(SessionError::Timeout))
    }

    /// Ends the identity session; the listener releases the profile subscription.
    /// Only a signed-in session moves to `Unauthenticated`; an unavailable
    /// service stays unavailable until `retry`.
    pub async fn logout(&self) -> Result<(), GatewayError> {
        self.identity.sign_out().await?;
        if matches!(self.state(), SessionState::Authenticated(_)) {
            self.publisher.publish(SessionState::Unauthenticated);
        }
        Ok(())
    }

    /// Creates the first administrator. Only permitted while no profile exists.
    pub async fn bootstrap_admin(
        &mut self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<Professor, BootstrapError> {
        validation::new_account(name, email, password)?;
        if self.state() != SessionState::FirstRunSetup {
            return Err(BootstrapError::NotFirstRun);
        }

        let admin = provision_professor(
            self.identity.as_ref(),
            self.profiles.as_ref(),
            name,
            email,
            password,
            Role::Admin,
        )
        .await
        .map_err(|err| match err {
            GatewayError::Conflict(_) => BootstrapError::OrphanedAccount {
                email: email.trim().to_string(),
            },
            other => BootstrapError::Gateway(other),
        })?;

        tracing::info!(professor_id = %admin.id, "first administrator created");
        self.initialize().await;
        Ok(admin)
    }

    fn stop_listener(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.stop_listener();
    }
}

enum ProfileEvent {
    Snapshot(Option<Professor>),
    Failed(GatewayError),
}

struct AuthListener {
    identity: Arc<dyn IdentityProvider>,
    profiles: Arc<dyn ProfileStore>,
    publisher: StatePublisher,
}

impl AuthListener {
    async fn run(self) {
        let mut auth = self.identity.auth_events();
        let (events_tx, mut events) = mpsc::unbounded_channel::<(Uuid, ProfileEvent)>();
        let mut watched: Option<(Uuid, Subscription)> = None;

        let initial = auth.borrow_and_update().clone();
        self.on_auth_change(initial, &mut watched, &events_tx);

        loop {
            tokio::select! {
                changed = auth.changed() => {
                    if changed.is_err() {
                        tracing::debug!("identity provider closed its event stream");
                        break;
                    }
                    let principal = auth.borrow_and_update().clone();
                    self.on_auth_change(principal, &mut watched, &events_tx);
                }
                Some((id, event)) = events.recv() => {
                    // Events from a subscription that has since been replaced are stale.
                    if watched.as_ref().map(|(watched_id, _)| *watched_id) == Some(id) {
                        self.on_profile_event(id, event, &mut watched).await;
                    }
                }
            }
        }
    }

    fn on_auth_change(
        &self,
        principal: Option<Principal>,
        watched: &mut Option<(Uuid, Subscription)>,
        events: &mpsc::UnboundedSender<(Uuid, ProfileEvent)>,
    ) {
        if let Some((_, subscription)) = watched.take() {
            subscription.unsubscribe();
        }

        let Some(principal) = principal else {
            if !matches!(self.publisher.get(), SessionState::ServiceUnavailable { .. }) {
                self.publisher.publish(SessionState::Unauthenticated);
            }
            return;
        };

        let id = principal.id;
        self.publisher
            .publish(SessionState::Authenticated(AuthPhase::Loading { principal: id }));

        let data_tx = events.clone();
        let error_tx = events.clone();
        let subscription = self.profiles.subscribe_profile(
            id,
            Box::new(move |snapshot| {
                let _ = data_tx.send((id, ProfileEvent::Snapshot(snapshot)));
            }),
            Box::new(move |err| {
                let _ = error_tx.send((id, ProfileEvent::Failed(err)));
            }),
        );
        *watched = Some((id, subscription));
    }

    async fn on_profile_event(
        &self,
        id: Uuid,
        event: ProfileEvent,
        watched: &mut Option<(Uuid, Subscription)>,
    ) {
        match event {
            ProfileEvent::Snapshot(Some(professor)) => {
                self.publisher
                    .publish(SessionState::Authenticated(AuthPhase::Ready(Session { professor })));
            }
            ProfileEvent::Snapshot(None) => {
                tracing::warn!(account_id = %id, "signed-in account has no profile record, signing out");
                watched.take();
                self.force_sign_out().await;
            }
            ProfileEvent::Failed(err) if err.is_unavailable() => {
                tracing::error!(account_id = %id, error = %err, "profile listener lost the backend");
                watched.take();
                self.publisher.publish(SessionState::ServiceUnavailable {
                    reason: err.to_string(),
                });
            }
            ProfileEvent::Failed(err) => {
                tracing::error!(account_id = %id, error = %err, "profile listener failed, signing out");
                watched.take();
                self.force_sign_out().await;
            }
        }
    }

    async fn force_sign_out(&self) {
        if let Err(err) = self.identity.sign_out().await {
            tracing::error!(error = %err, "forced sign-out failed");
        }
        self.publisher.publish(SessionState::Unauthenticated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{professor, MemoryIdentity, MemoryProfiles};

    const WAIT: Duration = Duration::from_secs(2);

    struct Fixture {
        identity: Arc<MemoryIdentity>,
        profiles: Arc<MemoryProfiles>,
        guard: SessionGuard,
    }

    fn fixture(identity: MemoryIdentity, profiles: MemoryProfiles) -> Fixture {
        let identity = Arc::new(identity);
        let profiles = Arc::new(profiles);
        let guard = SessionGuard::new(identity.clone(), profiles.clone());
        Fixture {
            identity,
            profiles,
            guard,
        }
    }

    /// One professor with a matching account, password "secreto".
    fn seeded(role: Role) -> (Fixture, Professor) {
        let prof = professor("Marta Ruiz", "marta@example.com", role);
        let fixture = fixture(
            MemoryIdentity::new().with_account(prof.id, &prof.email, "secreto"),
            MemoryProfiles::new().with_profile(prof.clone()),
        );
        (fixture, prof)
    }

    async fn wait_until(guard: &SessionGuard, pred: impl Fn(&SessionState) -> bool) -> SessionState {
        let mut rx = guard.watch();
        let state = tokio::time::timeout(WAIT, rx.wait_for(|s| pred(s)))
            .await
            .expect("state never reached")
            .expect("state channel closed")
            .clone();
        state
    }

    #[tokio::test]
    async fn empty_profile_store_enters_first_run_setup() {
        let mut f = fixture(MemoryIdentity::new(), MemoryProfiles::new());
        f.guard.initialize().await;
        assert_eq!(f.guard.state(), SessionState::FirstRunSetup);
    }

    #[tokio::test]
    async fn existing_profiles_without_principal_are_unauthenticated() {
        let (mut f, _) = seeded(Role::Professor);
        f.guard.initialize().await;
        assert_eq!(f.guard.settled(WAIT).await, Ok(SessionState::Unauthenticated));
    }

    #[tokio::test]
    async fn unavailable_check_can_be_retried() {
        let (mut f, _) = seeded(Role::Professor);
        f.profiles
            .fail_checks(Some(GatewayError::Unavailable("connection refused".into())));
        f.guard.initialize().await;
        assert!(matches!(
            f.guard.state(),
            SessionState::ServiceUnavailable { .. }
        ));
        assert_eq!(f.profiles.check_count(), 1);

        f.profiles.fail_checks(None);
        let mut transitions = f.guard.transitions();
        f.guard.retry().await.unwrap();

        assert_eq!(transitions.recv().await.unwrap(), SessionState::Initializing);
        assert_eq!(f.profiles.check_count(), 2);
        assert_eq!(f.guard.settled(WAIT).await, Ok(SessionState::Unauthenticated));
    }

    #[tokio::test]
    async fn retry_is_rejected_outside_service_unavailable() {
        let mut f = fixture(MemoryIdentity::new(), MemoryProfiles::new());
        f.guard.initialize().await;
        assert_eq!(f.guard.retry().await, Err(SessionError::RetryNotAvailable));
    }

    #[tokio::test]
    async fn login_reaches_ready_with_profile_role() {
        let (mut f, prof) = seeded(Role::Admin);
        f.guard.initialize().await;
        f.guard.settled(WAIT).await.unwrap();

        let session = f.guard.login("marta@example.com", "secreto", WAIT).await.unwrap();
        assert_eq!(session.professor, prof);
        assert!(session.is_admin());
        assert_eq!(f.guard.state().role(), Some(Role::Admin));
    }

    #[tokio::test]
    async fn wrong_password_leaves_state_unchanged() {
        let (mut f, _) = seeded(Role::Professor);
        f.guard.initialize().await;
        f.guard.settled(WAIT).await.unwrap();

        let result = f.guard.login("marta@example.com", "equivocada", WAIT).await;
        assert_eq!(result, Err(SessionError::SignIn(GatewayError::InvalidCredentials)));
        assert_eq!(f.guard.state(), SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn account_without_profile_is_signed_out() {
        let prof = professor("Marta Ruiz", "marta@example.com", Role::Professor);
        let mut f = fixture(
            MemoryIdentity::new()
                .with_account(prof.id, &prof.email, "secreto")
                .with_account(Uuid::new_v4(), "sin.perfil@example.com", "secreto"),
            MemoryProfiles::new().with_profile(prof),
        );
        f.guard.initialize().await;
        f.guard.settled(WAIT).await.unwrap();

        let result = f.guard.login("sin.perfil@example.com", "secreto", WAIT).await;
        assert_eq!(result, Err(SessionError::ProfileMissing));
        assert_eq!(
            wait_until(&f.guard, |s| s.is_settled()).await,
            SessionState::Unauthenticated
        );
        assert_eq!(f.identity.current(), None);
    }

    #[tokio::test]
    async fn deleted_profile_forces_sign_out() {
        let (mut f, prof) = seeded(Role::Professor);
        f.guard.initialize().await;
        f.guard.settled(WAIT).await.unwrap();
        f.guard.login("marta@example.com", "secreto", WAIT).await.unwrap();

        f.profiles.remove(prof.id);

        let state = wait_until(&f.guard, |s| *s == SessionState::Unauthenticated).await;
        assert_eq!(state, SessionState::Unauthenticated);
        assert_eq!(f.identity.current(), None);
    }

    #[tokio::test]
    async fn listener_connectivity_loss_is_service_unavailable() {
        let (mut f, _) = seeded(Role::Professor);
        f.guard.initialize().await;
        f.guard.settled(WAIT).await.unwrap();
        f.guard.login("marta@example.com", "secreto", WAIT).await.unwrap();

        f.profiles
            .fail_listeners(GatewayError::Unavailable("socket closed".into()));

        let state = wait_until(&f.guard, |s| {
            matches!(s, SessionState::ServiceUnavailable { .. })
        })
        .await;
        assert!(state.session().is_none());
    }

    #[tokio::test]
    async fn profile_rename_is_pushed_into_the_session() {
        let (mut f, prof) = seeded(Role::Professor);
        f.guard.initialize().await;
        f.guard.settled(WAIT).await.unwrap();
        f.guard.login("marta@example.com", "secreto", WAIT).await.unwrap();

        f.profiles
            .update_profile_name(prof.id, "Marta Ruiz Soto")
            .await
            .unwrap();

        let state = wait_until(&f.guard, |s| {
            s.session()
                .is_some_and(|session| session.professor.name == "Marta Ruiz Soto")
        })
        .await;
        assert_eq!(state.role(), Some(Role::Professor));
    }

    #[tokio::test]
    async fn logout_returns_to_unauthenticated() {
        let (mut f, _) = seeded(Role::Professor);
        f.guard.initialize().await;
        f.guard.settled(WAIT).await.unwrap();
        f.guard.login("marta@example.com", "secreto", WAIT).await.unwrap();

        f.guard.logout().await.unwrap();
        assert_eq!(f.guard.state(), SessionState::Unauthenticated);
        assert_eq!(f.identity.current(), None);
    }

    #[tokio::test]
    async fn logout_keeps_service_unavailable() {
        let (mut f, _) = seeded(Role::Professor);
        f.guard.initialize().await;
        f.guard.settled(WAIT).await.unwrap();
        f.guard.login("marta@example.com", "secreto", WAIT).await.unwrap();
        f.profiles
            .fail_listeners(GatewayError::Unavailable("socket closed".into()));
        wait_until(&f.guard, |s| matches!(s, SessionState::ServiceUnavailable { .. })).await;

        f.guard.logout().await.unwrap();
        // Give the listener time to react to the sign-out event.
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(matches!(
            f.guard.state(),
            SessionState::ServiceUnavailable { .. }
        ));
        assert_eq!(f.identity.current(), None);
        assert!(f.guard.retry().await.is_ok());
    }

    #[tokio::test]
    async fn logout_after_failed_start_stays_unavailable() {
        let (mut f, _) = seeded(Role::Professor);
        f.profiles
            .fail_checks(Some(GatewayError::Unavailable("connection refused".into())));
        f.guard.initialize().await;

        f.guard.logout().await.unwrap();
        assert!(matches!(
            f.guard.state(),
            SessionState::ServiceUnavailable { .. }
        ));
    }

    #[tokio::test]
    async fn login_is_unavailable_during_first_run() {
        let mut f = fixture(MemoryIdentity::new(), MemoryProfiles::new());
        f.guard.initialize().await;
        assert_eq!(
            f.guard.login("a@example.com", "secreto", WAIT).await,
            Err(SessionError::LoginUnavailable("first-run-setup"))
        );
    }

    #[tokio::test]
    async fn bootstrap_creates_admin_and_reinitialises() {
        let mut f = fixture(MemoryIdentity::new(), MemoryProfiles::new());
        f.guard.initialize().await;

        let admin = f
            .guard
            .bootstrap_admin("Director Académico", "director@example.com", "secreto")
            .await
            .unwrap();
        assert_eq!(admin.role, Role::Admin);
        assert_eq!(f.guard.settled(WAIT).await, Ok(SessionState::Unauthenticated));

        let session = f
            .guard
            .login("director@example.com", "secreto", WAIT)
            .await
            .unwrap();
        assert!(session.is_admin());
    }

    #[tokio::test]
    async fn bootstrap_against_orphaned_account_needs_remediation() {
        let mut f = fixture(MemoryIdentity::new(), MemoryProfiles::new());
        f.identity
            .create_account("director@example.com", "anterior")
            .await
            .unwrap();
        f.guard.initialize().await;

        let result = f
            .guard
            .bootstrap_admin("Director", "director@example.com", "secreto")
            .await;
        assert!(matches!(
            result,
            Err(BootstrapError::OrphanedAccount { ref email }) if email == "director@example.com"
        ));
        assert_eq!(f.guard.state(), SessionState::FirstRunSetup);
    }

    #[tokio::test]
    async fn bootstrap_is_refused_once_profiles_exist() {
        let (mut f, _) = seeded(Role::Admin);
        f.guard.initialize().await;
        f.guard.settled(WAIT).await.unwrap();
        let result = f
            .guard
            .bootstrap_admin("Intruso", "intruso@example.com", "secreto")
            .await;
        assert!(matches!(result, Err(BootstrapError::NotFirstRun)));
        assert_eq!(f.identity.account_id("intruso@example.com"), None);
    }

    #[tokio::test]
    async fn bootstrap_validates_before_touching_the_backend() {
        let mut f = fixture(MemoryIdentity::new(), MemoryProfiles::new());
        f.guard.initialize().await;
        let result = f
            .guard
            .bootstrap_admin("Director", "director@example.com", "123")
            .await;
        assert!(matches!(result, Err(BootstrapError::Validation(_))));
        assert_eq!(f.identity.account_id("director@example.com"), None);
    }
}
