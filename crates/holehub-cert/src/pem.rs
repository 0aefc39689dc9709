//! PEM decoding into rustls types

use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::CertificateError;

/// Decode every certificate in a PEM buffer
pub fn load_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, CertificateError> {
    let certs = rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CertificateError::Parse {
            path: "<pem>".into(),
            reason: e.to_string(),
        })?;

    if certs.is_empty() {
        return Err(CertificateError::NoCertificate);
    }
    Ok(certs)
}

/// Decode the first private key (PKCS#8, SEC1 or PKCS#1) in a PEM buffer
pub fn load_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>, CertificateError> {
    rustls_pemfile::private_key(&mut &pem[..])
        .map_err(|e| CertificateError::Parse {
            path: "<pem>".into(),
            reason: e.to_string(),
        })?
        .ok_or(CertificateError::NoPrivateKey)
}
