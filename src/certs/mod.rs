//! Self-signed TLS bootstrap
//!
//! Produces a throwaway certificate authority and a CA-signed server
//! certificate so the webhook can terminate TLS without external provisioning.
//! Runs once, before the listener starts. Every failure is returned to the
//! caller, which is expected to abort startup.
//!
//! # Layout
//!
//! Bootstrapped material lives in a single directory:
//!
//! - `tls.crt`: leaf certificate (PEM)
//! - `tls.key`: leaf private key (PEM, mode `0600`)
//! - `ca.crt`: issuing CA certificate (PEM), used for the webhook `caBundle`
//!
//! The CA private key only exists in memory for the duration of issuance.

pub mod store;

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};

use base64::Engine;
use rand::RngCore;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, Ia5String, IsCa, KeyPair, KeyUsagePurpose, SanType, SerialNumber,
    SignatureAlgorithm,
};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};
use x509_parser::pem::parse_x509_pem;

pub const CERT_FILE: &str = "tls.crt";
pub const KEY_FILE: &str = "tls.key";
pub const CA_CERT_FILE: &str = "ca.crt";

/// Lifetime of both the CA and the leaf
pub const VALIDITY_DAYS: i64 = 365;

const ORGANIZATION: &str = "kgv";
const CA_COMMON_NAME: &str = "kgv-ca";
const LEAF_COMMON_NAME: &str = "kgv-webhook";

/// 16 random bytes keeps the DER integer well under the 20-octet limit
const SERIAL_LEN: usize = 16;

/// P-384 sits above the 4096-bit RSA security level
static KEY_ALGORITHM: &SignatureAlgorithm = &rcgen::PKCS_ECDSA_P384_SHA384;

#[derive(Error, Debug)]
pub enum CertificateError {
    #[error("key generation failed: {0}")]
    KeyGeneration(#[source] rcgen::Error),

    #[error("certificate construction failed: {0}")]
    Construction(#[source] rcgen::Error),

    #[error("invalid DNS name {name:?}: {source}")]
    InvalidDnsName {
        name: String,
        #[source]
        source: rcgen::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed certificate: {0}")]
    Malformed(String),

    #[error("certificate chain verification failed: {0}")]
    Verification(String),
}

/// Paths of the certificate and key the TLS listener should load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl TlsPaths {
    /// Canonical locations inside a bootstrap directory
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            cert: dir.join(CERT_FILE),
            key: dir.join(KEY_FILE),
        }
    }
}

/// Generate a fresh key pair for a CA or leaf
pub fn generate_key_pair() -> Result<KeyPair, CertificateError> {
    KeyPair::generate_for(KEY_ALGORITHM).map_err(CertificateError::KeyGeneration)
}

/// A self-signed certificate authority together with its signing key
pub struct CertificateAuthority {
    cert: Certificate,
    key: KeyPair,
}

impl CertificateAuthority {
    /// Generate a new CA valid for [`VALIDITY_DAYS`] from now
    pub fn generate() -> Result<Self, CertificateError> {
        let key = generate_key_pair()?;

        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(CA_COMMON_NAME);
        params.serial_number = Some(random_serial());
        params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        set_validity(&mut params);

        let cert = params
            .self_signed(&key)
            .map_err(CertificateError::Construction)?;

        Ok(Self { cert, key })
    }

    /// CA certificate in PEM encoding
    pub fn cert_pem(&self) -> String {
        self.cert.pem()
    }

    /// Issue a server certificate for the loopback addresses, `localhost`
    /// and any extra `dns_names`
    pub fn issue_leaf(&self, dns_names: &[String]) -> Result<LeafCertificate, CertificateError> {
        let key = generate_key_pair()?;

        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(LEAF_COMMON_NAME);
        params.serial_number = Some(random_serial());
        params.is_ca = IsCa::NoCa;
        params.subject_alt_names = subject_alt_names(dns_names)?;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        params.use_authority_key_identifier_extension = true;
        set_validity(&mut params);

        let cert = params
            .signed_by(&key, &self.cert, &self.key)
            .map_err(CertificateError::Construction)?;

        Ok(LeafCertificate {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
        })
    }
}

/// A CA-signed server certificate and its private key, both PEM encoded
pub struct LeafCertificate {
    pub cert_pem: String,
    pub key_pem: String,
}

/// Ensure a server certificate and key exist in `dir`.
///
/// An existing pair is reused as-is. Otherwise a new CA and leaf are issued
/// and the leaf certificate, leaf key and CA certificate are written to `dir`.
pub fn bootstrap(dir: &Path, dns_names: &[String]) -> Result<TlsPaths, CertificateError> {
    let paths = TlsPaths::in_dir(dir);

    match (paths.cert.exists(), paths.key.exists()) {
        (true, true) => {
            info!(
                cert = %paths.cert.display(),
                key = %paths.key.display(),
                "Reusing existing TLS certificate"
            );
            return Ok(paths);
        }
        (false, false) => {}
        _ => warn!(
            dir = %dir.display(),
            "Found an incomplete certificate/key pair, regenerating both"
        ),
    }

    info!(dir = %dir.display(), "Generating self-signed TLS certificate");

    store::ensure_dir(dir)?;

    let ca = CertificateAuthority::generate()?;
    let ca_pem = ca.cert_pem();
    let leaf = ca.issue_leaf(dns_names)?;
    verify_issued_by(&leaf.cert_pem, &ca_pem)?;
    debug!("Issued leaf certificate verified against its CA");

    store::write_public(&dir.join(CA_CERT_FILE), &ca_pem)?;
    store::write_public(&paths.cert, &leaf.cert_pem)?;
    // key last: a crash before this point leaves an incomplete pair, which is regenerated
    store::write_private(&paths.key, &leaf.key_pem)?;

    info!(
        cert = %paths.cert.display(),
        key = %paths.key.display(),
        "TLS certificate written"
    );

    Ok(paths)
}

/// Base64 of the bootstrapped CA certificate, as expected in a webhook
/// configuration's `clientConfig.caBundle`
pub fn ca_bundle(dir: &Path) -> Result<String, CertificateError> {
    let pem = store::read_pem(&dir.join(CA_CERT_FILE))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(pem))
}

/// Check that `leaf_pem` was signed by the CA in `ca_pem` and is currently valid
pub fn verify_issued_by(leaf_pem: &str, ca_pem: &str) -> Result<(), CertificateError> {
    let (_, leaf_block) = parse_x509_pem(leaf_pem.as_bytes())
        .map_err(|e| CertificateError::Malformed(format!("leaf PEM: {e}")))?;
    let leaf = leaf_block
        .parse_x509()
        .map_err(|e| CertificateError::Malformed(format!("leaf certificate: {e}")))?;

    let (_, ca_block) = parse_x509_pem(ca_pem.as_bytes())
        .map_err(|e| CertificateError::Malformed(format!("CA PEM: {e}")))?;
    let ca = ca_block
        .parse_x509()
        .map_err(|e| CertificateError::Malformed(format!("CA certificate: {e}")))?;

    if !ca.is_ca() {
        return Err(CertificateError::Verification(
            "issuer is not a certificate authority".to_string(),
        ));
    }

    if leaf.issuer().to_string() != ca.subject().to_string() {
        return Err(CertificateError::Verification(format!(
            "issuer {} does not match CA subject {}",
            leaf.issuer(),
            ca.subject()
        )));
    }

    leaf.verify_signature(Some(ca.public_key()))
        .map_err(|e| CertificateError::Verification(format!("signature: {e}")))?;

    if !leaf.validity().is_valid() {
        return Err(CertificateError::Verification(
            "certificate is outside its validity window".to_string(),
        ));
    }

    Ok(())
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, ORGANIZATION);
    dn.push(DnType::CommonName, common_name);
    dn
}

fn subject_alt_names(dns_names: &[String]) -> Result<Vec<SanType>, CertificateError> {
    let mut sans = vec![
        SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        SanType::IpAddress(IpAddr::V6(Ipv6Addr::LOCALHOST)),
    ];

    let localhost = std::iter::once("localhost".to_string());
    for name in localhost.chain(dns_names.iter().cloned()) {
        let ia5 = Ia5String::try_from(name.clone())
            .map_err(|source| CertificateError::InvalidDnsName { name, source })?;
        sans.push(SanType::DnsName(ia5));
    }

    Ok(sans)
}

fn set_validity(params: &mut CertificateParams) {
    let now = OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + Duration::days(VALIDITY_DAYS);
}

fn random_serial() -> SerialNumber {
    let mut bytes = [0u8; SERIAL_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    // keep the integer positive and non-zero
    bytes[0] &= 0x7f;
    bytes[0] |= 0x01;
    SerialNumber::from_slice(&bytes)
}
