use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Server credential could not be resolved.
///
/// Always fatal to activation: a gate is never built without a usable credential.
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("failed to read credential source {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed keytab: {0}")]
    MalformedKeytab(String),

    #[error("unsupported keytab format version: {0:#06x}")]
    UnsupportedKeytabVersion(u16),

    #[error("invalid principal name: {0}")]
    InvalidPrincipal(String),

    #[error("principal {principal} does not belong to the configured realm {realm}")]
    RealmMismatch { principal: String, realm: String },

    #[error("no usable AES key found for {0}")]
    NoUsableKey(String),

    #[error("key derivation failed: {0:?}")]
    KeyDerivation(#[from] picky_krb::crypto::KerberosCryptoError),
}

/// Reason a negotiation was rejected.
///
/// Every variant is surfaced to the client as an HTTP `401`/`403` response by the gate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("malformed token: {0}")]
    MalformedToken(String),

    #[error("KRB_AP_ERR_TKT_EXPIRED: {0}")]
    ExpiredTicket(String),

    #[error("realm mismatch: expected one of [{expected}] but got {actual}")]
    RealmMismatch { expected: String, actual: String },

    #[error("unsupported mechanism: {0}")]
    UnsupportedMechanism(String),

    #[error("negotiation exceeded the limit of {limit} continuation rounds")]
    RoundLimitExceeded { limit: u32 },

    #[error("KRB_AP_ERR_SKEW: {0}")]
    ClockSkew(String),

    #[error("KRB_AP_ERR_REPEAT: authenticator of {0} was already presented")]
    ReplayDetected(String),

    #[error("KRB_AP_ERR_NOT_US: ticket is issued for {0}")]
    ServiceMismatch(String),

    #[error("KRB_AP_ERR_NOKEY: no service key for etype {etype} (kvno {kvno:?})")]
    NoServiceKey { etype: u8, kvno: Option<u32> },

    #[error("negotiation session deadline has passed")]
    SessionExpired,
}

impl NegotiationError {
    /// Short stable code for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            NegotiationError::MalformedToken(_) => "malformed-token",
            NegotiationError::ExpiredTicket(_) => "expired-ticket",
            NegotiationError::RealmMismatch { .. } => "realm-mismatch",
            NegotiationError::UnsupportedMechanism(_) => "unsupported-mechanism",
            NegotiationError::RoundLimitExceeded { .. } => "round-limit-exceeded",
            NegotiationError::ClockSkew(_) => "clock-skew",
            NegotiationError::ReplayDetected(_) => "replay-detected",
            NegotiationError::ServiceMismatch(_) => "service-mismatch",
            NegotiationError::NoServiceKey { .. } => "no-service-key",
            NegotiationError::SessionExpired => "session-expired",
        }
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        NegotiationError::MalformedToken(message.into())
    }
}

impl From<picky_asn1_der::Asn1DerError> for NegotiationError {
    fn from(err: picky_asn1_der::Asn1DerError) -> Self {
        NegotiationError::MalformedToken(format!("ASN1 DER decoding failed: {err:?}"))
    }
}

impl From<picky_krb::crypto::KerberosCryptoError> for NegotiationError {
    fn from(err: picky_krb::crypto::KerberosCryptoError) -> Self {
        NegotiationError::MalformedToken(format!("KRB_AP_ERR_MODIFIED: {err:?}"))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    #[error("realm {realm} is not in the allowed realm list")]
    RealmNotAllowed { realm: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("realm must not be empty")]
    EmptyRealm,

    #[error("invalid KDC address: {0}")]
    InvalidKdc(String),

    #[error("invalid {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("provisioning directory {0} does not exist")]
    MissingDirectory(PathBuf),
}

/// Failure to bring the gate up. Nothing is served when activation fails.
#[derive(Error, Debug)]
pub enum ActivationError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("provisioning failed: {0}")]
    Provision(#[from] ProvisionError),
}
