//! TLS material check
//!
//! Certificates are decoded from PEM and parsed as X.509. The client
//! certificate must match its private key, the CA must be a CA, and both are
//! checked for expiry. A certificate inside the warning window is reported
//! but still usable.

use aws_lc_rs::signature::{
    EcdsaKeyPair, Ed25519KeyPair, KeyPair as _, RsaKeyPair, ECDSA_P256_SHA256_ASN1_SIGNING,
    ECDSA_P384_SHA384_ASN1_SIGNING,
};
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use x509_parser::prelude::*;

use telemetry_common::crd::LogPipelineOutputTls;

/// Certificates expiring within this many days are reported as about to expire
pub const EXPIRY_WARNING_DAYS: i64 = 14;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Why TLS material was rejected
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TlsError {
    /// Only one half of the client key pair is set
    #[error("a certificate and private key must either both be provided or both be missing")]
    MissingCertKeyPair,

    /// Certificate is not PEM
    #[error("failed to decode PEM block containing certificate")]
    CertDecode,

    /// Certificate is not valid X.509
    #[error("failed to parse certificate: {0}")]
    CertParse(String),

    /// Private key is not PEM
    #[error("failed to decode PEM block containing private key")]
    KeyDecode,

    /// CA certificate is not PEM
    #[error("failed to decode PEM block containing CA certificate")]
    CaDecode,

    /// CA certificate is not valid X.509
    #[error("failed to parse CA certificate: {0}")]
    CaParse(String),

    /// Private key belongs to a different certificate
    #[error("certificate and private key do not match")]
    KeyMismatch,

    /// CA certificate lacks the CA basic constraint
    #[error("not a CA certificate")]
    NotCa,

    /// Client certificate is past its expiry
    #[error("TLS certificate expired on {}", .0.format(DATE_FORMAT))]
    CertExpired(DateTime<Utc>),

    /// Client certificate expires soon
    #[error("TLS certificate is about to expire, configured certificate is valid until {}", .0.format(DATE_FORMAT))]
    CertAboutToExpire(DateTime<Utc>),

    /// CA certificate is past its expiry
    #[error("TLS CA certificate expired on {}", .0.format(DATE_FORMAT))]
    CaExpired(DateTime<Utc>),

    /// CA certificate expires soon
    #[error("TLS CA certificate is about to expire, configured certificate is valid until {}", .0.format(DATE_FORMAT))]
    CaAboutToExpire(DateTime<Utc>),
}

impl TlsError {
    /// True for expiry errors
    pub fn is_expired(&self) -> bool {
        matches!(self, Self::CertExpired(_) | Self::CaExpired(_))
    }

    /// True for the warning-window errors; the pipeline stays usable
    pub fn is_about_to_expire(&self) -> bool {
        matches!(self, Self::CertAboutToExpire(_) | Self::CaAboutToExpire(_))
    }
}

/// Resolved PEM bytes, newlines already unescaped
#[derive(Clone, Debug, Default)]
pub struct TlsMaterial {
    /// CA certificate
    pub ca: Option<Vec<u8>>,
    /// Client certificate
    pub cert: Option<Vec<u8>>,
    /// Client private key
    pub key: Option<Vec<u8>>,
}

/// Cert and key must be set together
pub fn check_pairing(tls: &LogPipelineOutputTls) -> Result<(), TlsError> {
    if tls.cert().is_some() != tls.key().is_some() {
        return Err(TlsError::MissingCertKeyPair);
    }
    Ok(())
}

enum Expiry {
    Valid,
    AboutToExpire(DateTime<Utc>),
    Expired(DateTime<Utc>),
}

fn expiry(cert: &X509Certificate<'_>, now: DateTime<Utc>) -> Expiry {
    let not_after = DateTime::<Utc>::from_timestamp(cert.validity().not_after.timestamp(), 0)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    if now > not_after {
        Expiry::Expired(not_after)
    } else if not_after - now <= Duration::days(EXPIRY_WARNING_DAYS) {
        Expiry::AboutToExpire(not_after)
    } else {
        Expiry::Valid
    }
}

fn decode(data: &[u8], err: TlsError) -> Result<::pem::Pem, TlsError> {
    ::pem::parse(data).map_err(|_| err)
}

/// Check TLS material at `now`.
///
/// Hard failures win over the warning window: an expired CA is reported even
/// when the client certificate is merely about to expire.
pub fn validate_tls(material: &TlsMaterial, now: DateTime<Utc>) -> Result<(), TlsError> {
    let cert_pem = material
        .cert
        .as_deref()
        .map(|c| decode(c, TlsError::CertDecode))
        .transpose()?;
    let cert = cert_pem
        .as_ref()
        .map(|p| {
            X509Certificate::from_der(p.contents())
                .map(|(_, c)| c)
                .map_err(|e| TlsError::CertParse(e.to_string()))
        })
        .transpose()?;

    let key_pem = material
        .key
        .as_deref()
        .map(|k| decode(k, TlsError::KeyDecode))
        .transpose()?;

    let ca_pem = material
        .ca
        .as_deref()
        .map(|c| decode(c, TlsError::CaDecode))
        .transpose()?;
    let ca = ca_pem
        .as_ref()
        .map(|p| {
            X509Certificate::from_der(p.contents())
                .map(|(_, c)| c)
                .map_err(|e| TlsError::CaParse(e.to_string()))
        })
        .transpose()?;

    let mut warning = None;

    if let (Some(cert), Some(key_pem)) = (cert.as_ref(), key_pem.as_ref()) {
        check_key_match(cert, key_pem)?;
        match expiry(cert, now) {
            Expiry::Expired(at) => return Err(TlsError::CertExpired(at)),
            Expiry::AboutToExpire(at) => warning = Some(TlsError::CertAboutToExpire(at)),
            Expiry::Valid => {}
        }
    }

    if let Some(ca) = ca.as_ref() {
        if !ca.is_ca() {
            return Err(TlsError::NotCa);
        }
        match expiry(ca, now) {
            Expiry::Expired(at) => return Err(TlsError::CaExpired(at)),
            Expiry::AboutToExpire(at) => {
                warning.get_or_insert(TlsError::CaAboutToExpire(at));
            }
            Expiry::Valid => {}
        }
    }

    warning.map_or(Ok(()), Err)
}

/// Public key bytes as they appear in a certificate's subjectPublicKey.
///
/// `None` for key formats that cannot be loaded here (SEC1 EC keys,
/// encrypted keys); those skip the match check.
fn public_key_of(key: &::pem::Pem) -> Option<Vec<u8>> {
    let der = key.contents();
    if key.tag() == "RSA PRIVATE KEY" {
        return RsaKeyPair::from_der(der)
            .ok()
            .map(|k| k.public_key().as_ref().to_vec());
    }

    if let Ok(k) = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, der) {
        return Some(k.public_key().as_ref().to_vec());
    }
    if let Ok(k) = EcdsaKeyPair::from_pkcs8(&ECDSA_P384_SHA384_ASN1_SIGNING, der) {
        return Some(k.public_key().as_ref().to_vec());
    }
    if let Ok(k) = Ed25519KeyPair::from_pkcs8_maybe_unchecked(der) {
        return Some(k.public_key().as_ref().to_vec());
    }
    RsaKeyPair::from_pkcs8(der)
        .ok()
        .map(|k| k.public_key().as_ref().to_vec())
}

fn check_key_match(cert: &X509Certificate<'_>, key: &::pem::Pem) -> Result<(), TlsError> {
    let Some(public_key) = public_key_of(key) else {
        return Ok(());
    };
    if public_key != cert.public_key().subject_public_key.data.as_ref() {
        return Err(TlsError::KeyMismatch);
    }
    Ok(())
}
