//! Per-user certificate authority
//!
//! Each HoleHub user gets a private root CA plus a reissuable leaf certificate
//! signed by it. The tunnel server side listens with the CA material and the
//! client presents the leaf, so both ends of a hole authenticate each other
//! without any public PKI.
//!
//! Files live flat in one directory:
//! `{subject}-ca.pem`, `{subject}-ca.key`, `{subject}-cert.pem`, `{subject}-cert.key`.

pub mod authority;
pub mod pem;

pub use authority::{
    CertificateAuthority, IssuedMaterial, KeyAlgorithm, SubjectPaths, DEFAULT_VALIDITY,
};
pub use pem::{load_certs, load_private_key};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CertificateError {
    #[error("Invalid certificate subject '{0}'")]
    InvalidSubject(String),

    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Certificate signing failed: {0}")]
    Signing(String),

    #[error("No CA material for subject '{0}'")]
    MissingCa(String),

    #[error("Failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The certificate was persisted but its private key was not
    #[error("Partial write: {written} was written but {failed} failed: {source}")]
    PartialWrite {
        written: PathBuf,
        failed: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No certificate found in PEM data")]
    NoCertificate,

    #[error("No private key found in PEM data")]
    NoPrivateKey,
}
