use async_trait::async_trait;
use uuid::Uuid;

use crate::error::GatewayError;
use crate::identity::IdentityProvider;
use crate::models::{Professor, Role};
use crate::subscription::{DataCallback, ErrorCallback, Subscription};

/// Profile records, keyed by identity account id.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Server-authoritative existence check, used for the first-run decision.
    async fn has_any_profile(&self) -> Result<bool, GatewayError>;

    async fn insert_profile(&self, profile: &Professor) -> Result<(), GatewayError>;

    async fn update_profile_name(&self, id: Uuid, name: &str) -> Result<(), GatewayError>;

    /// Pushes `Some(profile)` while the record exists and `None` once it does not.
    fn subscribe_profile(
        &self,
        id: Uuid,
        on_data: DataCallback<Option<Professor>>,
        on_error: ErrorCallback,
    ) -> Subscription;
}

/// Creates the identity account and its profile record as one unit.
///
/// When the profile write fails the new account is deleted again, so a failed
/// call does not leave an account that can sign in but has no profile.
pub async fn provision_professor(
    identity: &dyn IdentityProvider,
    profiles: &dyn ProfileStore,
    name: &str,
    email: &str,
    password: &str,
    role: Role,
) -> Result<Professor, GatewayError> {
    let principal = identity.create_account(email, password).await?;

    let professor = Professor {
        id: principal.id,
        name: name.trim().to_string(),
        email: principal.email,
        role,
    };

    if let Err(err) = profiles.insert_profile(&professor).await {
        tracing::error!(account_id = %professor.id, error = %err, "profile write failed, removing account");
        if let Err(cleanup) = identity.delete_account(professor.id).await {
            tracing::error!(
                account_id = %professor.id,
                error = %cleanup,
                "could not remove account after failed profile write"
            );
        }
        return Err(err);
    }

    tracing::info!(professor_id = %professor.id, role = %role, "professor provisioned");
    Ok(professor)
}
