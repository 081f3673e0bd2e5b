use std::fmt;

use picky_krb::constants::types::{NT_ENTERPRISE, NT_PRINCIPAL, NT_SRV_INST};
use picky_krb::data_types::PrincipalName;

use crate::error::CredentialError;

/// Kerberos principal name type.
///
/// [Principal Names](https://www.rfc-editor.org/rfc/rfc4120#section-6.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameType {
    Principal,
    ServiceInstance,
    Enterprise,
    Other(u8),
}

impl From<&[u8]> for NameType {
    fn from(raw: &[u8]) -> Self {
        match raw {
            [NT_PRINCIPAL] => NameType::Principal,
            [NT_SRV_INST] => NameType::ServiceInstance,
            [NT_ENTERPRISE] => NameType::Enterprise,
            [.., last] => NameType::Other(*last),
            [] => NameType::Other(0),
        }
    }
}

/// Realm-less principal name, e.g. `HTTP/www.example.com`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceName {
    components: Vec<String>,
}

impl ServiceName {
    pub fn parse(name: &str) -> Result<Self, CredentialError> {
        if name.is_empty() || name.contains('@') {
            return Err(CredentialError::InvalidPrincipal(name.to_owned()));
        }

        let components: Vec<String> = name.split('/').map(str::to_owned).collect();
        if components.iter().any(String::is_empty) {
            return Err(CredentialError::InvalidPrincipal(name.to_owned()));
        }

        Ok(Self { components })
    }

    pub fn from_components(components: Vec<String>) -> Self {
        Self { components }
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Compares against the `sname` of a ticket.
    pub(crate) fn matches(&self, name: &PrincipalName) -> bool {
        let names = &name.name_string.0 .0;

        names.len() == self.components.len()
            && names
                .iter()
                .zip(&self.components)
                .all(|(name, component)| name.to_string().eq_ignore_ascii_case(component))
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.components.join("/"))
    }
}

/// Forwarded client credentials.
///
/// Holds the raw `KRB-CRED` the client placed into the authenticator checksum when it asked for
/// delegation. The credential is still encrypted in the session key.
#[derive(Clone, PartialEq, Eq)]
pub struct DelegatedCredential {
    krb_cred: Vec<u8>,
}

impl DelegatedCredential {
    pub(crate) fn new(krb_cred: Vec<u8>) -> Self {
        Self { krb_cred }
    }

    pub fn krb_cred(&self) -> &[u8] {
        &self.krb_cred
    }
}

impl fmt::Debug for DelegatedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegatedCredential")
            .field("len", &self.krb_cred.len())
            .finish()
    }
}

/// A client principal whose ticket and authenticator were validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedPrincipal {
    components: Vec<String>,
    realm: String,
    name_type: NameType,
    delegated: Option<DelegatedCredential>,
}

impl AuthenticatedPrincipal {
    pub(crate) fn new(
        components: Vec<String>,
        realm: String,
        name_type: NameType,
        delegated: Option<DelegatedCredential>,
    ) -> Self {
        Self {
            components,
            realm,
            name_type,
            delegated,
        }
    }

    pub(crate) fn from_principal_name(
        cname: &PrincipalName,
        realm: String,
        delegated: Option<DelegatedCredential>,
    ) -> Self {
        let components = cname.name_string.0 .0.iter().map(|name| name.to_string()).collect();

        Self::new(components, realm, NameType::from(cname.name_type.0 .0.as_slice()), delegated)
    }

    /// Name components joined with `/`, without the realm.
    pub fn name(&self) -> String {
        self.components.join("/")
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn name_type(&self) -> NameType {
        self.name_type
    }

    pub fn delegated_credential(&self) -> Option<&DelegatedCredential> {
        self.delegated.as_ref()
    }
}

impl fmt::Display for AuthenticatedPrincipal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name(), self.realm)
    }
}
