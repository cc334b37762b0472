//! Session, profile and role resolution.
//!
//! Leaves first: [`profile::ProfileResolver`] → [`authority::RoleAuthority`]
//! → [`session::SessionManager`]; [`guard::AccessGuard`] gates protected
//! resources on the manager's state.

pub mod authority;
pub mod guard;
pub mod profile;
pub mod session;

use thiserror::Error;

use crate::backend::BackendError;

/// Minimum password length accepted by the auth service.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    CredentialError,

    #[error("Token error: {0}")]
    TokenError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not signed in")]
    NotSignedIn,

    #[error("Backend error: {0}")]
    Backend(BackendError),
}

impl From<BackendError> for AuthError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Unauthorized(_) => AuthError::CredentialError,
            BackendError::InvalidToken(msg) => AuthError::TokenError(msg),
            BackendError::NoSession => AuthError::NotSignedIn,
            other => AuthError::Backend(other),
        }
    }
}

/// Check an email/password pair before sending it anywhere.
pub fn validate_credentials(email: &str, password: &str) -> Result<(), AuthError> {
    validate_email(email)?;
    validate_password(password)
}

pub fn validate_email(email: &str) -> Result<(), AuthError> {
    let email = email.trim();
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !valid {
        return Err(AuthError::ValidationError(format!(
            "'{email}' is not a valid email address"
        )));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::ValidationError(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}
