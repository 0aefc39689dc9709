//! HoleHub wire types
//!
//! Request and response bodies exchanged between the control plane (`holehubd`)
//! and its clients. Shared by the API server and the client agent so both sides
//! agree on field names and enum spellings.

pub mod auth;
pub mod error;
pub mod hole;

pub use auth::{PingResponse, SessionResponse, SigninRequest, SignupRequest, SignupResponse};
pub use error::{ErrorCode, ErrorResponse};
pub use hole::{
    AckResponse, CreateHoleRequest, HoleDescriptor, HoleList, HoleStatus, Scheme, SchemeError,
};

/// Name of the cookie carrying the session token
pub const SESSION_COOKIE: &str = "session_token";
