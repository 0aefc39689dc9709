//! Session tokens and password hashing for the HoleHub control plane

pub mod password;
pub mod session;

pub use password::{hash_password, verify_password, PasswordError};
pub use session::{SessionClaims, SessionError, SessionKeys};
