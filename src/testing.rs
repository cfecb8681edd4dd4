//! In-memory stand-ins for the identity provider and profile store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::GatewayError;
use crate::gateway::ProfileStore;
use crate::identity::{normalize_email, IdentityProvider, Principal};
use crate::models::{Professor, Role};
use crate::subscription::{DataCallback, ErrorCallback, Subscription};

pub fn professor(name: &str, email: &str, role: Role) -> Professor {
    Professor {
        id: Uuid::new_v4(),
        name: name.to_string(),
        email: email.to_string(),
        role,
    }
}

pub struct MemoryIdentity {
    accounts: Mutex<HashMap<String, (Uuid, String)>>,
    current: watch::Sender<Option<Principal>>,
}

impl MemoryIdentity {
    pub fn new() -> Self {
        let (current, _) = watch::channel(None);
        Self {
            accounts: Mutex::new(HashMap::new()),
            current,
        }
    }

    /// Registers an account under a fixed id, e.g. one matching a profile.
    pub fn with_account(self, id: Uuid, email: &str, password: &str) -> Self {
        self.accounts
            .lock()
            .unwrap()
            .insert(normalize_email(email), (id, password.to_string()));
        self
    }

    pub fn account_id(&self, email: &str) -> Option<Uuid> {
        self.accounts
            .lock()
            .unwrap()
            .get(&normalize_email(email))
            .map(|(id, _)| *id)
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentity {
    async fn create_account(&self, email: &str, password: &str) -> Result<Principal, GatewayError> {
        let email = normalize_email(email);
        let mut accounts = self.accounts.lock().unwrap();
        if accounts.contains_key(&email) {
            return Err(GatewayError::Conflict(email));
        }
        let id = Uuid::new_v4();
        accounts.insert(email.clone(), (id, password.to_string()));
        Ok(Principal { id, email })
    }

    async fn delete_account(&self, id: Uuid) -> Result<(), GatewayError> {
        self.accounts
            .lock()
            .unwrap()
            .retain(|_, (account_id, _)| *account_id != id);
        Ok(())
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Principal, GatewayError> {
        let email = normalize_email(email);
        let id = match self.accounts.lock().unwrap().get(&email) {
            Some((id, stored)) if stored == password => *id,
            _ => return Err(GatewayError::InvalidCredentials),
        };
        let principal = Principal { id, email };
        self.current.send_replace(Some(principal.clone()));
        Ok(principal)
    }

    async fn sign_out(&self) -> Result<(), GatewayError> {
        self.current.send_replace(None);
        Ok(())
    }

    async fn update_password(&self, new_password: &str) -> Result<(), GatewayError> {
        let principal = self.current().ok_or(GatewayError::NotSignedIn)?;
        let mut accounts = self.accounts.lock().unwrap();
        let entry = accounts
            .get_mut(&principal.email)
            .ok_or_else(|| GatewayError::NotFound(principal.email.clone()))?;
        entry.1 = new_password.to_string();
        Ok(())
    }

    fn current(&self) -> Option<Principal> {
        self.current.borrow().clone()
    }

    fn auth_events(&self) -> watch::Receiver<Option<Principal>> {
        self.current.subscribe()
    }
}

#[derive(Default)]
struct ProfilesInner {
    records: Mutex<HashMap<Uuid, Professor>>,
    check_failure: Mutex<Option<GatewayError>>,
    write_failure: Mutex<Option<GatewayError>>,
    listener_failure: Mutex<Option<GatewayError>>,
    checks: AtomicUsize,
}

pub struct MemoryProfiles {
    inner: Arc<ProfilesInner>,
    changes: watch::Sender<u64>,
}

impl MemoryProfiles {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: Arc::new(ProfilesInner::default()),
            changes,
        }
    }

    pub fn with_profile(self, professor: Professor) -> Self {
        self.inner
            .records
            .lock()
            .unwrap()
            .insert(professor.id, professor);
        self
    }

    pub fn get(&self, id: Uuid) -> Option<Professor> {
        self.inner.records.lock().unwrap().get(&id).cloned()
    }

    pub fn remove(&self, id: Uuid) {
        self.inner.records.lock().unwrap().remove(&id);
        self.bump();
    }

    /// Makes the first-run check fail until cleared with `None`.
    pub fn fail_checks(&self, err: Option<GatewayError>) {
        *self.inner.check_failure.lock().unwrap() = err;
    }

    pub fn fail_writes(&self, err: GatewayError) {
        *self.inner.write_failure.lock().unwrap() = Some(err);
    }

    /// Breaks every open profile listener with `err`.
    pub fn fail_listeners(&self, err: GatewayError) {
        *self.inner.listener_failure.lock().unwrap() = Some(err);
        self.bump();
    }

    pub fn check_count(&self) -> usize {
        self.inner.checks.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.changes.send_modify(|version| *version += 1);
    }
}

#[async_trait]
impl ProfileStore for MemoryProfiles {
    async fn has_any_profile(&self) -> Result<bool, GatewayError> {
        self.inner.checks.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.inner.check_failure.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(!self.inner.records.lock().unwrap().is_empty())
    }

    async fn insert_profile(&self, profile: &Professor) -> Result<(), GatewayError> {
        if let Some(err) = self.inner.write_failure.lock().unwrap().clone() {
            return Err(err);
        }
        self.inner
            .records
            .lock()
            .unwrap()
            .insert(profile.id, profile.clone());
        self.bump();
        Ok(())
    }

    async fn update_profile_name(&self, id: Uuid, name: &str) -> Result<(), GatewayError> {
        {
            let mut records = self.inner.records.lock().unwrap();
            let record = records
                .get_mut(&id)
                .ok_or_else(|| GatewayError::NotFound(id.to_string()))?;
            record.name = name.to_string();
        }
        self.bump();
        Ok(())
    }

    fn subscribe_profile(
        &self,
        id: Uuid,
        mut on_data: DataCallback<Option<Professor>>,
        on_error: ErrorCallback,
    ) -> Subscription {
        let inner = Arc::clone(&self.inner);
        let mut changes = self.changes.subscribe();
        Subscription::spawn(async move {
            changes.borrow_and_update();
            loop {
                let failure = inner.listener_failure.lock().unwrap().clone();
                if let Some(err) = failure {
                    on_error(err);
                    return;
                }
                let snapshot = inner.records.lock().unwrap().get(&id).cloned();
                on_data(snapshot);
                if changes.changed().await.is_err() {
                    return;
                }
            }
        })
    }
}
