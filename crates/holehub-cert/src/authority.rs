use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, RsaKeySize, SerialNumber,
    SignatureAlgorithm,
};
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::CertificateError;

/// Ten years
pub const DEFAULT_VALIDITY: Duration = Duration::from_secs(3650 * 24 * 60 * 60);

const ORGANIZATION: &str = "HoleHub";

/// Key algorithm for newly minted key pairs
///
/// Root and leaf keys default to 2048-bit RSA. The ECDSA curves are offered
/// for deployments whose tunnel servers prefer them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyAlgorithm {
    #[default]
    Rsa2048,
    EcdsaP256,
    EcdsaP384,
}

impl KeyAlgorithm {
    fn signature_algorithm(&self) -> &'static SignatureAlgorithm {
        match self {
            KeyAlgorithm::Rsa2048 => &rcgen::PKCS_RSA_SHA256,
            KeyAlgorithm::EcdsaP256 => &rcgen::PKCS_ECDSA_P256_SHA256,
            KeyAlgorithm::EcdsaP384 => &rcgen::PKCS_ECDSA_P384_SHA384,
        }
    }
}

/// File locations for one subject
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectPaths {
    pub ca_cert: PathBuf,
    pub ca_key: PathBuf,
    pub leaf_cert: PathBuf,
    pub leaf_key: PathBuf,
}

/// A freshly minted certificate and key, already persisted
#[derive(Debug, Clone)]
pub struct IssuedMaterial {
    pub cert_pem: String,
    pub key_pem: String,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Issues per-subject root and leaf certificates into a directory
///
/// Holds no key material in memory; every call reads and writes the files.
#[derive(Debug, Clone)]
pub struct CertificateAuthority {
    dir: PathBuf,
    validity: Duration,
    algorithm: KeyAlgorithm,
}

impl CertificateAuthority {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            validity: DEFAULT_VALIDITY,
            algorithm: KeyAlgorithm::default(),
        }
    }

    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    pub fn with_key_algorithm(mut self, algorithm: KeyAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn validity(&self) -> Duration {
        self.validity
    }

    pub fn paths(&self, subject: &str) -> Result<SubjectPaths, CertificateError> {
        validate_subject(subject)?;
        Ok(SubjectPaths {
            ca_cert: self.dir.join(format!("{}-ca.pem", subject)),
            ca_key: self.dir.join(format!("{}-ca.key", subject)),
            leaf_cert: self.dir.join(format!("{}-cert.pem", subject)),
            leaf_key: self.dir.join(format!("{}-cert.key", subject)),
        })
    }

    /// Whether root CA files exist for the subject
    pub fn has_root_ca(&self, subject: &str) -> bool {
        self.paths(subject)
            .map(|p| p.ca_cert.exists() && p.ca_key.exists())
            .unwrap_or(false)
    }

    /// Mint a new self-signed root CA for `subject`, replacing any existing one
    pub fn generate_root_ca(&self, subject: &str) -> Result<IssuedMaterial, CertificateError> {
        let paths = self.paths(subject)?;
        let key = self.generate_key()?;

        let mut params = self.base_params(format!("{} HoleHub CA", subject))?;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyCertSign,
        ];

        let cert = params
            .self_signed(&key)
            .map_err(|e| CertificateError::Signing(e.to_string()))?;

        let issued = self.persist(&cert, &key, paths.ca_cert, paths.ca_key)?;
        info!(subject = %subject, "Issued root CA");
        Ok(issued)
    }

    /// Mint a new leaf certificate signed by the subject's existing root CA
    pub fn generate_leaf_cert(&self, subject: &str) -> Result<IssuedMaterial, CertificateError> {
        let paths = self.paths(subject)?;
        if !paths.ca_cert.exists() || !paths.ca_key.exists() {
            return Err(CertificateError::MissingCa(subject.to_string()));
        }

        let ca_cert_pem = read(&paths.ca_cert)?;
        let ca_key_pem = read(&paths.ca_key)?;

        let ca_key = KeyPair::from_pem(&ca_key_pem).map_err(|e| CertificateError::Parse {
            path: paths.ca_key.clone(),
            reason: e.to_string(),
        })?;
        let ca_cert = CertificateParams::from_ca_cert_pem(&ca_cert_pem)
            .and_then(|params| params.self_signed(&ca_key))
            .map_err(|e| CertificateError::Parse {
                path: paths.ca_cert.clone(),
                reason: e.to_string(),
            })?;

        let key = self.generate_key()?;
        let mut params = self.base_params(subject.to_string())?;
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];

        let cert = params
            .signed_by(&key, &ca_cert, &ca_key)
            .map_err(|e| CertificateError::Signing(e.to_string()))?;

        let issued = self.persist(&cert, &key, paths.leaf_cert, paths.leaf_key)?;
        info!(subject = %subject, "Issued leaf certificate");
        Ok(issued)
    }

    pub fn read_ca_cert(&self, subject: &str) -> Result<String, CertificateError> {
        read(&self.paths(subject)?.ca_cert)
    }

    pub fn read_leaf_cert(&self, subject: &str) -> Result<String, CertificateError> {
        read(&self.paths(subject)?.leaf_cert)
    }

    pub fn read_leaf_key(&self, subject: &str) -> Result<String, CertificateError> {
        read(&self.paths(subject)?.leaf_key)
    }

    fn generate_key(&self) -> Result<KeyPair, CertificateError> {
        let alg = self.algorithm.signature_algorithm();
        match self.algorithm {
            KeyAlgorithm::Rsa2048 => KeyPair::generate_rsa_for(alg, RsaKeySize::_2048),
            KeyAlgorithm::EcdsaP256 | KeyAlgorithm::EcdsaP384 => KeyPair::generate_for(alg),
        }
        .map_err(|e| CertificateError::KeyGeneration(e.to_string()))
    }

    fn base_params(&self, common_name: String) -> Result<CertificateParams, CertificateError> {
        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name);
        dn.push(DnType::OrganizationName, ORGANIZATION);
        params.distinguished_name = dn;

        // Whole seconds so the encoded window matches the configured validity exactly
        let now = OffsetDateTime::now_utc().unix_timestamp();
        params.not_before = OffsetDateTime::from_unix_timestamp(now)
            .map_err(|e| CertificateError::Signing(e.to_string()))?;
        params.not_after = OffsetDateTime::from_unix_timestamp(now + self.validity.as_secs() as i64)
            .map_err(|e| CertificateError::Signing(e.to_string()))?;

        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ClientAuth,
            ExtendedKeyUsagePurpose::ServerAuth,
        ];
        params.serial_number = Some(SerialNumber::from(rand::random::<u64>()));

        Ok(params)
    }

    fn persist(
        &self,
        cert: &Certificate,
        key: &KeyPair,
        cert_path: PathBuf,
        key_path: PathBuf,
    ) -> Result<IssuedMaterial, CertificateError> {
        fs::create_dir_all(&self.dir).map_err(|source| CertificateError::Write {
            path: self.dir.clone(),
            source,
        })?;

        let cert_pem = cert.pem();
        let key_pem = key.serialize_pem();

        write_file(&cert_path, &cert_pem, false).map_err(|source| CertificateError::Write {
            path: cert_path.clone(),
            source,
        })?;
        write_file(&key_path, &key_pem, true).map_err(|source| {
            CertificateError::PartialWrite {
                written: cert_path.clone(),
                failed: key_path.clone(),
                source,
            }
        })?;

        debug!(cert = %cert_path.display(), key = %key_path.display(), "Persisted certificate");

        Ok(IssuedMaterial {
            cert_pem,
            key_pem,
            cert_path,
            key_path,
        })
    }
}

/// Subjects become file name prefixes
fn validate_subject(subject: &str) -> Result<(), CertificateError> {
    let valid = !subject.is_empty()
        && subject != "."
        && subject != ".."
        && subject
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'));
    if valid {
        Ok(())
    } else {
        Err(CertificateError::InvalidSubject(subject.to_string()))
    }
}

fn read(path: &Path) -> Result<String, CertificateError> {
    fs::read_to_string(path).map_err(|source| CertificateError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Write through a temporary file and rename, so readers never see half a PEM
fn write_file(path: &Path, contents: &str, private: bool) -> std::io::Result<()> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        if private {
            options.mode(0o600);
        }
    }
    #[cfg(not(unix))]
    let _ = private;

    let mut file = options.open(&tmp)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use x509_parser::prelude::*;

    fn parse(pem_str: &str) -> Vec<u8> {
        let (_, pem) = x509_parser::pem::parse_x509_pem(pem_str.as_bytes()).unwrap();
        pem.contents
    }

    #[test]
    fn test_leaf_signature_validates_against_ca() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::new(dir.path());

        let root = ca.generate_root_ca("alice").unwrap();
        let leaf = ca.generate_leaf_cert("alice").unwrap();

        let root_der = parse(&root.cert_pem);
        let leaf_der = parse(&leaf.cert_pem);
        let (_, root_cert) = X509Certificate::from_der(&root_der).unwrap();
        let (_, leaf_cert) = X509Certificate::from_der(&leaf_der).unwrap();

        let is_ca = |cert: &X509Certificate<'_>| {
            cert.basic_constraints()
                .unwrap()
                .map(|bc| bc.value.ca)
                .unwrap_or(false)
        };
        assert!(is_ca(&root_cert));
        assert!(!is_ca(&leaf_cert));
        assert!(leaf_cert
            .verify_signature(Some(root_cert.public_key()))
            .is_ok());
        assert_eq!(leaf_cert.issuer(), root_cert.subject());
    }

    #[test]
    fn test_default_keys_are_rsa_2048() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::new(dir.path());

        let root = ca.generate_root_ca("mia").unwrap();
        let leaf = ca.generate_leaf_cert("mia").unwrap();

        for pem in [&root.cert_pem, &leaf.cert_pem] {
            let der = parse(pem);
            let (_, cert) = X509Certificate::from_der(&der).unwrap();
            match cert.public_key().parsed().unwrap() {
                x509_parser::public_key::PublicKey::RSA(rsa) => assert!(rsa.key_size() >= 2048),
                _ => panic!("expected an RSA public key"),
            }
        }
    }

    #[test]
    fn test_validity_window_matches_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let validity = Duration::from_secs(30 * 24 * 60 * 60);
        let ca = CertificateAuthority::new(dir.path()).with_validity(validity);

        let root = ca.generate_root_ca("bob").unwrap();
        let leaf = ca.generate_leaf_cert("bob").unwrap();

        for pem in [&root.cert_pem, &leaf.cert_pem] {
            let der = parse(pem);
            let (_, cert) = X509Certificate::from_der(&der).unwrap();
            let window = cert.validity().not_after.timestamp() - cert.validity().not_before.timestamp();
            assert_eq!(window, validity.as_secs() as i64);
        }
    }

    #[test]
    fn test_default_validity_is_ten_years() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::new(dir.path());
        let root = ca.generate_root_ca("carol").unwrap();

        let der = parse(&root.cert_pem);
        let (_, cert) = X509Certificate::from_der(&der).unwrap();
        let window = cert.validity().not_after.timestamp() - cert.validity().not_before.timestamp();
        assert_eq!(window, 3650 * 24 * 60 * 60);
    }

    #[test]
    fn test_ca_usages() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::new(dir.path());
        let root = ca.generate_root_ca("dave").unwrap();

        let der = parse(&root.cert_pem);
        let (_, cert) = X509Certificate::from_der(&der).unwrap();

        let key_usage = cert.key_usage().unwrap().unwrap().value;
        assert!(key_usage.digital_signature());
        assert!(key_usage.key_cert_sign());

        let eku = cert.extended_key_usage().unwrap().unwrap().value;
        assert!(eku.client_auth);
        assert!(eku.server_auth);
    }

    #[test]
    fn test_files_use_subject_layout() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::new(dir.path());

        ca.generate_root_ca("erin").unwrap();
        ca.generate_leaf_cert("erin").unwrap();

        for name in ["erin-ca.pem", "erin-ca.key", "erin-cert.pem", "erin-cert.key"] {
            assert!(dir.path().join(name).exists(), "missing {}", name);
        }
        assert!(ca.has_root_ca("erin"));
        assert!(!ca.has_root_ca("frank"));
    }

    #[cfg(unix)]
    #[test]
    fn test_private_keys_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::new(dir.path());
        let root = ca.generate_root_ca("gina").unwrap();

        let mode = fs::metadata(&root.key_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_every_call_mints_fresh_material() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::new(dir.path());
        ca.generate_root_ca("hank").unwrap();

        let first = ca.generate_leaf_cert("hank").unwrap();
        let second = ca.generate_leaf_cert("hank").unwrap();
        assert_ne!(first.key_pem, second.key_pem);
        assert_eq!(ca.read_leaf_key("hank").unwrap(), second.key_pem);
    }

    #[test]
    fn test_leaf_without_ca_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::new(dir.path());

        let result = ca.generate_leaf_cert("ivan");
        assert!(matches!(result, Err(CertificateError::MissingCa(_))));
    }

    #[test]
    fn test_corrupt_ca_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::new(dir.path());
        ca.generate_root_ca("judy").unwrap();
        fs::write(dir.path().join("judy-ca.key"), "garbage").unwrap();

        let result = ca.generate_leaf_cert("judy");
        assert!(matches!(result, Err(CertificateError::Parse { .. })));
    }

    #[test]
    fn test_partial_write_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::new(dir.path());
        ca.generate_root_ca("kate").unwrap();

        // A directory where the key's temp file should go makes the key write fail
        fs::create_dir(dir.path().join("kate-cert.key.tmp")).unwrap();

        match ca.generate_leaf_cert("kate") {
            Err(CertificateError::PartialWrite { written, failed, .. }) => {
                assert_eq!(written, dir.path().join("kate-cert.pem"));
                assert_eq!(failed, dir.path().join("kate-cert.key"));
            }
            other => panic!("expected partial write, got {:?}", other.map(|m| m.cert_path)),
        }
    }

    #[test]
    fn test_rejects_path_like_subjects() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::new(dir.path());

        assert!(matches!(
            ca.generate_root_ca("../etc"),
            Err(CertificateError::InvalidSubject(_))
        ));
        assert!(ca.paths("").is_err());
    }

    #[test]
    fn test_pem_helpers_decode_issued_material() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::new(dir.path()).with_key_algorithm(KeyAlgorithm::EcdsaP384);
        ca.generate_root_ca("leo").unwrap();
        let leaf = ca.generate_leaf_cert("leo").unwrap();

        assert_eq!(crate::load_certs(leaf.cert_pem.as_bytes()).unwrap().len(), 1);
        assert!(crate::load_private_key(leaf.key_pem.as_bytes()).is_ok());
        assert!(matches!(
            crate::load_certs(b"nothing"),
            Err(CertificateError::NoCertificate)
        ));
    }
}
