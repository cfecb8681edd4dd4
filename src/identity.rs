use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::GatewayError;

/// An authenticated identity-provider account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: Uuid,
    pub email: String,
}

/// Credential accounts and the "signed in / signed out" event stream.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn create_account(&self, email: &str, password: &str) -> Result<Principal, GatewayError>;

    async fn delete_account(&self, id: Uuid) -> Result<(), GatewayError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Principal, GatewayError>;

    async fn sign_out(&self) -> Result<(), GatewayError>;

    /// Changes the password of the signed-in principal.
    async fn update_password(&self, new_password: &str) -> Result<(), GatewayError>;

    fn current(&self) -> Option<Principal>;

    /// Emits the current principal now and on every sign-in or sign-out.
    fn auth_events(&self) -> watch::Receiver<Option<Principal>>;
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn hash_password(password: &str) -> Result<String, GatewayError> {
    let salt_bytes: [u8; 16] = rand::random();
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|err| GatewayError::Backend(format!("salt encoding failed: {err}")))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| GatewayError::Backend(format!("password hashing failed: {err}")))
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(err) => {
            tracing::warn!(error = %err, "stored password hash is malformed");
            false
        }
    }
}

/// Accounts kept in the `accounts` table, session held in-process.
pub struct PgIdentityProvider {
    pool: PgPool,
    current: watch::Sender<Option<Principal>>,
}

impl PgIdentityProvider {
    pub fn new(pool: PgPool) -> Self {
        let (current, _) = watch::channel(None);
        Self { pool, current }
    }
}

#[async_trait]
impl IdentityProvider for PgIdentityProvider {
    async fn create_account(&self, email: &str, password: &str) -> Result<Principal, GatewayError> {
        let email = normalize_email(email);
        let password_hash = hash_password(password)?;

        let id: Uuid = sqlx::query(
            r#"
            INSERT INTO accounts (email, password_hash)
            VALUES ($1, $2)
            RETURNING id
            "#,
        )
        .bind(&email)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await?
        .get("id");

        tracing::info!(account_id = %id, %email, "identity account created");
        Ok(Principal { id, email })
    }

    async fn delete_account(&self, id: Uuid) -> Result<(), GatewayError> {
        sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        tracing::info!(account_id = %id, "identity account deleted");
        Ok(())
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Principal, GatewayError> {
        let email = normalize_email(email);
        let row = sqlx::query("SELECT id, password_hash FROM accounts WHERE email = $1")
            .bind(&email)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            tracing::debug!(%email, "sign-in for unknown email");
            return Err(GatewayError::InvalidCredentials);
        };
        let stored: String = row.get("password_hash");
        if !verify_password(password, &stored) {
            tracing::debug!(%email, "sign-in with wrong password");
            return Err(GatewayError::InvalidCredentials);
        }

        let principal = Principal {
            id: row.get("id"),
            email,
        };
        tracing::info!(account_id = %principal.id, "signed in");
        self.current.send_replace(Some(principal.clone()));
        Ok(principal)
    }

    async fn sign_out(&self) -> Result<(), GatewayError> {
        if let Some(previous) = self.current.send_replace(None) {
            tracing::info!(account_id = %previous.id, "signed out");
        }
        Ok(())
    }

    async fn update_password(&self, new_password: &str) -> Result<(), GatewayError> {
        let principal = self.current().ok_or(GatewayError::NotSignedIn)?;
        let password_hash = hash_password(new_password)?;

        let result = sqlx::query("UPDATE accounts SET password_hash = $1 WHERE id = $2")
            .bind(password_hash)
            .bind(principal.id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(GatewayError::NotFound(format!("account {}", principal.id)));
        }
        tracing::info!(account_id = %principal.id, "password updated");
        Ok(())
    }

    fn current(&self) -> Option<Principal> {
        self.current.borrow().clone()
    }

    fn auth_events(&self) -> watch::Receiver<Option<Principal>> {
        self.current.subscribe()
    }
}
