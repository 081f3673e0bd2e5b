use crate::config::{GateConfig, MapperConfig, RealmPolicy};
use crate::error::MappingError;
use crate::principal::AuthenticatedPrincipal;

/// Application identity of an authenticated request.
///
/// Inserted into the request extensions by the gate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub name: String,
    pub realm: String,
    pub groups: Vec<String>,
}

/// Converts Kerberos principals into [Identity] values.
#[derive(Debug, Clone)]
pub struct IdentityMapper {
    realm_policy: RealmPolicy,
    allowed_realms: Vec<String>,
    lowercase: bool,
    default_groups: Vec<String>,
}

impl IdentityMapper {
    pub fn new(realm: &str, config: &MapperConfig) -> Self {
        let allowed_realms = if config.allowed_realms.is_empty() {
            vec![realm.to_owned()]
        } else {
            config.allowed_realms.clone()
        };

        Self {
            realm_policy: config.realm_policy,
            allowed_realms,
            lowercase: config.lowercase,
            default_groups: config.default_groups.clone(),
        }
    }

    pub fn from_config(config: &GateConfig) -> Self {
        Self::new(&config.realm, &config.mapper)
    }

    pub fn map(&self, principal: &AuthenticatedPrincipal) -> Result<Identity, MappingError> {
        let realm = principal.realm();

        if !self
            .allowed_realms
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(realm))
        {
            return Err(MappingError::RealmNotAllowed {
                realm: realm.to_owned(),
            });
        }

        let name = match self.realm_policy {
            RealmPolicy::Strip => principal.name(),
            RealmPolicy::Keep => principal.to_string(),
        };
        let name = if self.lowercase { name.to_lowercase() } else { name };

        Ok(Identity {
            name,
            realm: realm.to_owned(),
            groups: self.default_groups.clone(),
        })
    }
}
