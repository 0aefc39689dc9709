//! Structured error body returned by every failing API call

use serde::{Deserialize, Serialize};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Stable numeric error codes
///
/// Codes 0-10 keep the values older HoleHub clients already understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Success = 0,
    UserExists = 1,
    EmailExists = 2,
    EmailFormat = 3,
    InvalidCredentials = 4,
    UserNotFound = 7,
    HoleNotFound = 10,
    NameConflict = 11,
    Forbidden = 12,
    Validation = 13,
    SessionRequired = 14,
    InvalidState = 15,
    Certificate = 16,
    Process = 17,
    Internal = 99,
}

impl ErrorCode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct ErrorResponse {
    /// Stable numeric code
    pub code: u32,
    /// Human readable summary
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ErrorResponse {
    pub fn new(code: ErrorCode, error: impl Into<String>) -> Self {
        Self {
            code: code.as_u32(),
            error: error.into(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}
