//! User accounts
//!
//! Buckets: `users` (name -> JSON [`UserRecord`]) and `emails` (email -> name).
//! Signing up also issues the user's root CA and first leaf certificate.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use holehub_auth::{hash_password, verify_password};
use holehub_cert::{CertificateAuthority, CertificateError};
use holehub_store::{Store, StoreError, WriteBatch};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ControlError;

pub const USERS_BUCKET: &str = "users";
pub const EMAILS_BUCKET: &str = "emails";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

pub struct UserDirectory {
    store: Arc<dyn Store>,
    ca: Arc<CertificateAuthority>,
}

impl UserDirectory {
    pub fn new(store: Arc<dyn Store>, ca: Arc<CertificateAuthority>) -> Self {
        Self { store, ca }
    }

    pub async fn signup(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<UserRecord, ControlError> {
        let name = name.trim();
        let email = email.trim().to_lowercase();
        validate_username(name)?;
        if !is_valid_email(&email) {
            return Err(ControlError::EmailFormat(email));
        }
        if password.is_empty() {
            return Err(ControlError::Validation("password must not be empty".into()));
        }

        if self.exists(name).await? {
            return Err(ControlError::UserExists(name.to_string()));
        }
        if self.store.get(EMAILS_BUCKET, &email).await?.is_some() {
            return Err(ControlError::EmailExists(email));
        }

        let user = UserRecord {
            name: name.to_string(),
            email: email.clone(),
            password_hash: hash_password(password)?,
            created_at: Utc::now(),
        };
        let raw = serde_json::to_string(&user)
            .map_err(|e| StoreError::corrupt(USERS_BUCKET, name, e))?;

        let batch = WriteBatch::new()
            .insert(USERS_BUCKET, name, raw)
            .insert(EMAILS_BUCKET, &email, name);
        match self.store.commit(batch).await {
            Ok(()) => {}
            Err(StoreError::Conflict { bucket, .. }) if bucket == USERS_BUCKET => {
                return Err(ControlError::UserExists(name.to_string()))
            }
            Err(StoreError::Conflict { .. }) => return Err(ControlError::EmailExists(email)),
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = self.issue_certificates(name).await {
            warn!(user = %name, "Certificate issue failed, rolling back signup: {}", e);
            let rollback = WriteBatch::new()
                .delete(USERS_BUCKET, name)
                .delete(EMAILS_BUCKET, &email);
            if let Err(rollback_err) = self.store.commit(rollback).await {
                warn!(user = %name, "Signup rollback failed: {}", rollback_err);
            }
            return Err(e);
        }

        info!(user = %name, "Signed up new user");
        Ok(user)
    }

    /// Verify credentials; `login` is a username or an email address
    pub async fn authenticate(&self, login: &str, password: &str) -> Result<UserRecord, ControlError> {
        let login = login.trim();
        let name = if login.contains('@') {
            match self.store.get(EMAILS_BUCKET, &login.to_lowercase()).await? {
                Some(name) => name,
                None => return Err(ControlError::InvalidCredentials),
            }
        } else {
            login.to_string()
        };

        let user = self
            .get(&name)
            .await?
            .ok_or(ControlError::InvalidCredentials)?;

        if verify_password(password, &user.password_hash)? {
            Ok(user)
        } else {
            Err(ControlError::InvalidCredentials)
        }
    }

    pub async fn get(&self, name: &str) -> Result<Option<UserRecord>, ControlError> {
        match self.store.get(USERS_BUCKET, name).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StoreError::corrupt(USERS_BUCKET, name, e).into()),
            None => Ok(None),
        }
    }

    pub async fn exists(&self, name: &str) -> Result<bool, ControlError> {
        Ok(self.store.get(USERS_BUCKET, name).await?.is_some())
    }

    /// Replace the user's root CA and reissue the leaf under it
    pub async fn reissue_ca(&self, name: &str) -> Result<(), ControlError> {
        self.require(name).await?;
        self.issue_certificates(name).await
    }

    /// Reissue the user's leaf certificate under the existing root CA
    pub async fn reissue_leaf(&self, name: &str) -> Result<(), ControlError> {
        self.require(name).await?;
        self.with_ca(name, |ca, subject| ca.generate_leaf_cert(subject).map(drop))
            .await
    }

    async fn require(&self, name: &str) -> Result<(), ControlError> {
        if self.exists(name).await? {
            Ok(())
        } else {
            Err(ControlError::UserNotFound(name.to_string()))
        }
    }

    async fn issue_certificates(&self, name: &str) -> Result<(), ControlError> {
        self.with_ca(name, |ca, subject| {
            ca.generate_root_ca(subject)?;
            ca.generate_leaf_cert(subject)?;
            Ok(())
        })
        .await
    }

    /// Key generation and the certificate file writes block, so they run on
    /// the blocking pool.
    async fn with_ca<F>(&self, name: &str, work: F) -> Result<(), ControlError>
    where
        F: FnOnce(&CertificateAuthority, &str) -> Result<(), CertificateError> + Send + 'static,
    {
        let ca = self.ca.clone();
        let subject = name.to_string();
        tokio::task::spawn_blocking(move || work(&ca, &subject))
            .await
            .map_err(|e| ControlError::Internal(format!("certificate task failed: {}", e)))?
            .map_err(ControlError::from)
    }
}

/// Usernames double as certificate file prefixes and owner-list keys
fn validate_username(name: &str) -> Result<(), ControlError> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !name.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(ControlError::Validation(format!(
            "username '{}' must be 1-64 characters of letters, digits, '-', '_' or '.'",
            name
        )))
    }
}

fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}
