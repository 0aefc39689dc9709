use thiserror::Error;

use holehub_proto::ErrorCode;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Control plane unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    /// Structured error returned by the control plane
    #[error("{message} (code {code})")]
    Api {
        status: u16,
        code: u32,
        message: String,
        suggestion: Option<String>,
    },

    #[error("Not logged in: {0}")]
    Session(String),

    #[error("Tunnel engine error: {0}")]
    Process(String),

    #[error("Tunnel endpoint {endpoint} unreachable after {attempts} attempts: {reason}")]
    Unreachable {
        endpoint: String,
        attempts: u32,
        reason: String,
    },

    #[error("Certificate error: {0}")]
    Certificate(#[from] holehub_cert::CertificateError),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown hole '{0}'")]
    UnknownHole(String),
}

impl ClientError {
    /// Numeric control plane code, if the server answered with one
    pub fn code(&self) -> Option<u32> {
        match self {
            ClientError::Api { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_session_error(&self) -> bool {
        match self {
            ClientError::Session(_) => true,
            ClientError::Api { status, code, .. } => {
                *status == 401 || *code == ErrorCode::SessionRequired.as_u32()
            }
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code() == Some(ErrorCode::HoleNotFound.as_u32())
    }
}
