use thiserror::Error;

/// Failures reported by the persistence gateway and the identity provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// The backend could not be reached. Recoverable by retrying.
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    Conflict(String),
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("no account is signed in")]
    NotSignedIn,
    #[error("backend error: {0}")]
    Backend(String),
}

impl GatewayError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, GatewayError::Unavailable(_))
    }
}

impl From<sqlx::Error> for GatewayError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => GatewayError::Unavailable(err.to_string()),
            sqlx::Error::RowNotFound => GatewayError::NotFound(err.to_string()),
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some("42501") => GatewayError::PermissionDenied(db.message().to_string()),
                Some("23505") => GatewayError::Conflict(db.message().to_string()),
                // SQLSTATE class 08: connection exception
                Some(code) if code.starts_with("08") => {
                    GatewayError::Unavailable(db.message().to_string())
                }
                _ => GatewayError::Backend(err.to_string()),
            },
            _ => GatewayError::Backend(err.to_string()),
        }
    }
}

/// Input rejected before any backend round-trip.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("password must be at least {0} characters")]
    PasswordTooShort(usize),
    #[error("passwords do not match")]
    PasswordMismatch,
    #[error("unknown semester '{0}'")]
    UnknownSemester(String),
    #[error("criterion '{criterion}' is not part of the {semester} rubric")]
    UnknownCriterion { criterion: String, semester: String },
    #[error("score {score} for criterion '{criterion}' is outside 0-10")]
    ScoreOutOfRange { criterion: String, score: f64 },
    #[error("every criterion needs a score above 0 before saving")]
    Incomplete,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("first-run setup is only available while no profile exists")]
    NotFirstRun,
    /// The identity account exists but its profile was never written.
    #[error("an account for {email} already exists without a profile")]
    OrphanedAccount { email: String },
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("retry is only available while the service is unavailable")]
    RetryNotAvailable,
    #[error("cannot sign in while the session is {0}")]
    LoginUnavailable(&'static str),
    #[error("sign-in failed: {0}")]
    SignIn(GatewayError),
    /// Signed in, but the account has no profile record; the session was ended.
    #[error("this account has no profile and was signed out")]
    ProfileMissing,
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("timed out waiting for the session to settle")]
    Timeout,
}

/// Why the text generator produced nothing usable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedbackFailure {
    #[error("text generation is not configured")]
    MissingConfiguration,
    #[error("generation request failed: {0}")]
    Request(String),
    #[error("generation API returned status {status}: {body}")]
    Api { status: u16, body: String },
    #[error("generation API returned no text")]
    EmptyResponse,
}
