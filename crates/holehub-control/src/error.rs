use holehub_auth::PasswordError;
use holehub_cert::CertificateError;
use holehub_proto::ErrorCode;
use holehub_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Invalid email address '{0}'")]
    EmailFormat(String),

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("User '{0}' not found")]
    UserNotFound(String),

    #[error("User '{0}' already exists")]
    UserExists(String),

    #[error("Email '{0}' is already registered")]
    EmailExists(String),

    #[error("Hole '{0}' not found")]
    HoleNotFound(String),

    #[error("Hole name '{0}' is already taken")]
    NameConflict(String),

    #[error("Hole '{id}' does not belong to '{user}'")]
    Forbidden { user: String, id: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("No ports left above the configured floor")]
    PortsExhausted,

    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),

    #[error("Tunnel server process error: {0}")]
    Process(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Password error: {0}")]
    Password(#[from] PasswordError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Stable numeric code reported to clients
    pub fn code(&self) -> ErrorCode {
        match self {
            ControlError::Validation(_) => ErrorCode::Validation,
            ControlError::EmailFormat(_) => ErrorCode::EmailFormat,
            ControlError::InvalidCredentials => ErrorCode::InvalidCredentials,
            ControlError::UserNotFound(_) => ErrorCode::UserNotFound,
            ControlError::UserExists(_) => ErrorCode::UserExists,
            ControlError::EmailExists(_) => ErrorCode::EmailExists,
            ControlError::HoleNotFound(_) => ErrorCode::HoleNotFound,
            ControlError::NameConflict(_) => ErrorCode::NameConflict,
            ControlError::Forbidden { .. } => ErrorCode::Forbidden,
            ControlError::InvalidState(_) => ErrorCode::InvalidState,
            ControlError::Certificate(_) => ErrorCode::Certificate,
            ControlError::Process(_) => ErrorCode::Process,
            ControlError::PortsExhausted
            | ControlError::Store(_)
            | ControlError::Password(_)
            | ControlError::Internal(_) => ErrorCode::Internal,
        }
    }

    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            ControlError::EmailFormat(_) => Some("Use an address like name@example.com"),
            ControlError::InvalidCredentials => Some("Run `holehub login` again"),
            ControlError::UserExists(_) => Some("Pick another username or sign in"),
            ControlError::EmailExists(_) => Some("Sign in with the existing account"),
            ControlError::HoleNotFound(_) => Some("List your holes with `holehub ls`"),
            ControlError::NameConflict(_) => {
                Some("Choose a different name or remove the existing hole")
            }
            ControlError::Forbidden { .. } => Some("Only the owner can manage this hole"),
            ControlError::Certificate(_) => Some("Reissue certificates with POST /api/ca"),
            _ => None,
        }
    }
}
