//! Server-side Kerberos credentials.
//!
//! The credential is resolved once at startup and shared read-only by every negotiation.

pub mod keytab;

use std::fmt;
use std::fs;

use picky_krb::crypto::CipherSuite;
use picky_krb::data_types::PrincipalName;

pub use self::keytab::{Keytab, KeytabEntry};
use crate::config::{CredentialSource, GateConfig};
use crate::error::{CredentialError, NegotiationError};
use crate::principal::ServiceName;
use crate::Secret;

/// `aes128-cts-hmac-sha1-96`
pub const AES128_CTS_HMAC_SHA1_96: u8 = 17;
/// `aes256-cts-hmac-sha1-96`
pub const AES256_CTS_HMAC_SHA1_96: u8 = 18;

/// Long-term key of a service principal.
pub struct ServiceKey {
    pub principal: ServiceName,
    /// `None` for keys derived from a password: they match any kvno.
    pub kvno: Option<u32>,
    pub etype: u8,
    pub key: Secret<Vec<u8>>,
}

impl ServiceKey {
    pub fn cipher_suite(&self) -> Result<CipherSuite, NegotiationError> {
        CipherSuite::try_from([self.etype].as_slice())
            .map_err(|_| NegotiationError::UnsupportedMechanism(format!("encryption type {}", self.etype)))
    }
}

impl fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceKey")
            .field("principal", &self.principal.to_string())
            .field("kvno", &self.kvno)
            .field("etype", &self.etype)
            .finish_non_exhaustive()
    }
}

/// Server identity: realm plus the keys of its service principals.
#[derive(Debug)]
pub struct ServerCredential {
    realm: String,
    keys: Vec<ServiceKey>,
}

impl ServerCredential {
    pub fn new(realm: String, keys: Vec<ServiceKey>) -> Result<Self, CredentialError> {
        if keys.is_empty() {
            return Err(CredentialError::NoUsableKey(realm));
        }

        Ok(Self { realm, keys })
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn keys(&self) -> &[ServiceKey] {
        &self.keys
    }

    /// Distinct service principals the credential can accept tickets for.
    pub fn principals(&self) -> Vec<&ServiceName> {
        let mut principals: Vec<&ServiceName> = Vec::new();
        for key in &self.keys {
            if !principals.contains(&&key.principal) {
                principals.push(&key.principal);
            }
        }

        principals
    }

    /// Finds the key a ticket was encrypted with.
    ///
    /// [Receipt of KRB_AP_REQ Message](https://www.rfc-editor.org/rfc/rfc4120#section-3.2.3):
    /// > If the key version indicated by the Ticket in the KRB_AP_REQ is not one the server can use
    /// > (e.g., it indicates an old key, and the server no longer possesses a copy of the old key),
    /// > the KRB_AP_ERR_BADKEYVER error is returned.
    pub(crate) fn select_key(
        &self,
        sname: &PrincipalName,
        etype: u8,
        kvno: Option<u32>,
    ) -> Result<&ServiceKey, NegotiationError> {
        let candidates: Vec<&ServiceKey> = self.keys.iter().filter(|key| key.principal.matches(sname)).collect();

        if candidates.is_empty() {
            let sname = sname
                .name_string
                .0
                 .0
                .iter()
                .map(|name| name.to_string())
                .collect::<Vec<_>>()
                .join("/");

            return Err(NegotiationError::ServiceMismatch(sname));
        }

        candidates
            .into_iter()
            .filter(|key| key.etype == etype)
            .filter(|key| match (kvno, key.kvno) {
                (Some(requested), Some(available)) => requested == available,
                _ => true,
            })
            .max_by_key(|key| key.kvno)
            .ok_or(NegotiationError::NoServiceKey { etype, kvno })
    }
}

/// Resolves the server credential described by the configuration.
#[instrument(level = "debug", skip_all, fields(realm = %config.realm))]
pub fn load(config: &GateConfig) -> Result<ServerCredential, CredentialError> {
    let principal_filter = config
        .service_principal
        .as_deref()
        .map(ServiceName::parse)
        .transpose()?;

    let keys = match &config.credential {
        CredentialSource::Keytab { path } => {
            let data = fs::read(path).map_err(|source| CredentialError::Unreadable {
                path: path.clone(),
                source,
            })?;
            let keytab = Keytab::decode(&data)?;
            debug!(path = %path.display(), entries = keytab.entries.len(), "Keytab loaded");

            keys_from_keytab(keytab, &config.realm, principal_filter.as_ref())?
        }
        CredentialSource::Password {
            principal,
            password,
            salt,
        } => {
            let principal = realmless_principal(principal, &config.realm)?;
            if let Some(filter) = &principal_filter {
                if *filter != principal {
                    return Err(CredentialError::NoUsableKey(filter.to_string()));
                }
            }

            derive_password_keys(&principal, password, salt.as_deref(), &config.realm)?
        }
    };

    for key in &keys {
        debug!(principal = %key.principal, kvno = ?key.kvno, etype = key.etype, "Service key available");
    }

    let credential = ServerCredential::new(config.realm.clone(), keys)?;
    info!(
        principals = ?credential.principals().iter().map(|p| p.to_string()).collect::<Vec<_>>(),
        "Server credential loaded"
    );

    Ok(credential)
}

fn realmless_principal(principal: &str, realm: &str) -> Result<ServiceName, CredentialError> {
    match principal.rsplit_once('@') {
        Some((name, principal_realm)) => {
            if !principal_realm.eq_ignore_ascii_case(realm) {
                return Err(CredentialError::RealmMismatch {
                    principal: principal.to_owned(),
                    realm: realm.to_owned(),
                });
            }

            ServiceName::parse(name)
        }
        None => ServiceName::parse(principal),
    }
}

fn keys_from_keytab(
    keytab: Keytab,
    realm: &str,
    principal_filter: Option<&ServiceName>,
) -> Result<Vec<ServiceKey>, CredentialError> {
    let candidates: Vec<KeytabEntry> = keytab
        .entries
        .into_iter()
        .filter(|entry| {
            principal_filter.map_or(true, |filter| {
                filter.components().len() == entry.components.len()
                    && filter
                        .components()
                        .iter()
                        .zip(&entry.components)
                        .all(|(expected, actual)| expected.eq_ignore_ascii_case(actual))
            })
        })
        .collect();

    let Some(first) = candidates.first() else {
        return Err(CredentialError::NoUsableKey(
            principal_filter.map_or_else(|| "keytab".to_owned(), |filter| filter.to_string()),
        ));
    };

    if !candidates.iter().any(|entry| entry.realm.eq_ignore_ascii_case(realm)) {
        return Err(CredentialError::RealmMismatch {
            principal: format!("{}@{}", first.principal_name(), first.realm),
            realm: realm.to_owned(),
        });
    }

    let keys: Vec<ServiceKey> = candidates
        .into_iter()
        .filter(|entry| entry.realm.eq_ignore_ascii_case(realm))
        .filter_map(|entry| {
            let etype = u8::try_from(entry.key_type)
                .ok()
                .filter(|etype| [AES128_CTS_HMAC_SHA1_96, AES256_CTS_HMAC_SHA1_96].contains(etype));

            match etype {
                Some(etype) => Some(ServiceKey {
                    principal: ServiceName::from_components(entry.components.clone()),
                    kvno: Some(entry.kvno),
                    etype,
                    key: entry.key.clone(),
                }),
                None => {
                    debug!(
                        principal = %entry.principal_name(),
                        key_type = entry.key_type,
                        "Skipping keytab entry with unsupported encryption type"
                    );
                    None
                }
            }
        })
        .collect();

    if keys.is_empty() {
        return Err(CredentialError::NoUsableKey(
            principal_filter.map_or_else(|| "keytab".to_owned(), |filter| filter.to_string()),
        ));
    }

    Ok(keys)
}

/// Default salt for a principal: the realm followed by every name component.
///
/// [Salt](https://www.rfc-editor.org/rfc/rfc4120#section-4)
pub fn default_salt(principal: &ServiceName, realm: &str) -> String {
    let mut salt = realm.to_owned();
    for component in principal.components() {
        salt.push_str(component);
    }

    salt
}

/// Derives the AES256 and AES128 keys of a principal from its password.
pub fn derive_password_keys(
    principal: &ServiceName,
    password: &str,
    salt: Option<&str>,
    realm: &str,
) -> Result<Vec<ServiceKey>, CredentialError> {
    let salt = salt.map_or_else(|| default_salt(principal, realm), str::to_owned);

    [CipherSuite::Aes256CtsHmacSha196, CipherSuite::Aes128CtsHmacSha196]
        .into_iter()
        .map(|cipher_suite| -> Result<ServiceKey, CredentialError> {
            let etype = u8::from(cipher_suite.clone());
            let key = cipher_suite
                .cipher()
                .generate_key_from_password(password.as_bytes(), salt.as_bytes())?;

            Ok(ServiceKey {
                principal: principal.clone(),
                kvno: None,
                etype,
                key: Secret::new(key),
            })
        })
        .collect()
}
