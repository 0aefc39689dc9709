//! Account password storage
//!
//! User records keep only an Argon2id PHC string (`$argon2id$v=19$m=...`).
//! The parameters and salt travel inside the string, so records hashed with
//! older parameters keep verifying after the defaults change.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use thiserror::Error;

/// Failures while hashing or checking an account password
#[derive(Error, Debug)]
pub enum PasswordError {
    /// Argon2 refused to hash the input
    #[error("Failed to hash password: {0}")]
    HashingFailed(String),

    /// The stored hash parsed but could not be checked
    #[error("Failed to verify password: {0}")]
    VerificationFailed(String),

    /// The stored value is not a PHC string
    #[error("Invalid password hash format: {0}")]
    InvalidHashFormat(String),
}

/// Hash `password` for a user record with a fresh 16-byte salt
///
/// # Example
/// ```
/// use holehub_auth::hash_password;
///
/// let stored = hash_password("correct horse").unwrap();
/// assert!(stored.starts_with("$argon2id$"));
/// ```
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordError::HashingFailed(e.to_string()))
}

/// Check a sign-in attempt against a stored PHC string
///
/// A wrong password is `Ok(false)`, so callers can answer with an
/// invalid-credentials error. Only a corrupt stored hash is an `Err`.
///
/// # Example
/// ```
/// use holehub_auth::{hash_password, verify_password};
///
/// let stored = hash_password("correct horse").unwrap();
/// assert!(verify_password("correct horse", &stored).unwrap());
/// assert!(!verify_password("battery staple", &stored).unwrap());
/// ```
pub fn verify_password(password: &str, stored: &str) -> Result<bool, PasswordError> {
    let parsed =
        PasswordHash::new(stored).map_err(|e| PasswordError::InvalidHashFormat(e.to_string()))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(PasswordError::VerificationFailed(e.to_string())),
    }
}
