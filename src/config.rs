use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::ConfigError;

/// Default number of `Continue` rounds a client may take before it is rejected.
pub const DEFAULT_ROUND_LIMIT: u32 = 5;
/// Default lifetime of an unfinished negotiation, in seconds.
pub const DEFAULT_SESSION_TIMEOUT: u64 = 5;
/// Default allowed clock difference between client and server, in seconds.
///
/// [Receipt of KRB_AP_REQ Message](https://www.rfc-editor.org/rfc/rfc4120#section-3.2.3) leaves
/// the value to local policy; five minutes is the usual MIT and Active Directory setting.
pub const DEFAULT_MAX_TIME_SKEW: u64 = 300;
/// Upper bound of `session_timeout_secs`.
pub const MAX_SESSION_TIMEOUT: u64 = 60 * 60;
/// Upper bound of `max_time_skew_secs`.
pub const MAX_TIME_SKEW: u64 = 24 * 60 * 60;

/// Where the service's long-term keys come from.
#[derive(Deserialize, PartialEq, Eq, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CredentialSource {
    /// MIT keytab file.
    Keytab { path: PathBuf },
    /// Service account password. AES keys are derived from it at load time.
    Password {
        /// Service principal without realm, e.g. `HTTP/www.example.com`.
        principal: String,
        password: String,
        /// Overrides the default `{REALM}{name components}` salt.
        #[serde(default)]
        salt: Option<String>,
    },
}

impl std::fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialSource::Keytab { path } => f.debug_struct("Keytab").field("path", path).finish(),
            CredentialSource::Password { principal, .. } => f
                .debug_struct("Password")
                .field("principal", principal)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MutualAuth {
    /// Send an AP-REP whenever the client asks for mutual authentication.
    #[default]
    WhenRequested,
    /// Never answer with an AP-REP.
    Never,
}

/// HTTP status used for rejected negotiations.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RejectStatus {
    #[default]
    Forbidden,
    /// `401` with a fresh `Negotiate` challenge.
    Unauthorized,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RealmPolicy {
    /// `alice@EXAMPLE.COM` becomes `alice`.
    #[default]
    Strip,
    /// `alice@EXAMPLE.COM` stays `alice@EXAMPLE.COM`.
    Keep,
}

/// Alternate authentication for clients that cannot do Kerberos.
///
/// Fallback is opt-in and scheme based: a request is only handed to the downstream
/// authenticator when it explicitly carries one of `schemes`.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(default, deny_unknown_fields)]
pub struct FallbackConfig {
    pub enabled: bool,
    /// Authorization schemes passed downstream unauthenticated, e.g. `Basic`.
    pub schemes: Vec<String>,
    /// Extra `WWW-Authenticate` values sent next to `Negotiate`, e.g. `Basic realm="intranet"`.
    pub challenges: Vec<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(default, deny_unknown_fields)]
pub struct MapperConfig {
    pub realm_policy: RealmPolicy,
    /// Realms a principal may come from. Empty means the gate realm only.
    pub allowed_realms: Vec<String>,
    pub lowercase: bool,
    pub default_groups: Vec<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProvisionConfig {
    /// Directory receiving `krb5.conf`.
    pub directory: PathBuf,
    /// Replace an existing file instead of keeping it.
    #[serde(default)]
    pub overwrite: bool,
}

/// Gate configuration.
///
/// Built once at startup and threaded into every component. There is no process-wide state:
/// two gates with different configurations can live in one process.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct GateConfig {
    /// Kerberos realm of the service, e.g. `EXAMPLE.COM`.
    pub realm: String,
    /// KDC address (`host`, `host:port` or `tcp://host:port`). Only used for provisioning.
    pub kdc: String,
    /// Restricts the keytab to a single service principal, e.g. `HTTP/www.example.com`.
    #[serde(default)]
    pub service_principal: Option<String>,
    pub credential: CredentialSource,
    #[serde(default = "default_round_limit")]
    pub round_limit: u32,
    /// The value must be in seconds.
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,
    /// The maximum allowed time difference between client and server clocks.
    ///
    /// The value must be in seconds.
    #[serde(default = "default_max_time_skew")]
    pub max_time_skew_secs: u64,
    #[serde(default)]
    pub mutual_auth: MutualAuth,
    #[serde(default = "default_true")]
    pub replay_cache: bool,
    /// Keep the identity on the connection after a successful negotiation.
    #[serde(default = "default_true")]
    pub persist_connection_auth: bool,
    #[serde(default)]
    pub reject_status: RejectStatus,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub mapper: MapperConfig,
    #[serde(default)]
    pub provision: Option<ProvisionConfig>,
}

fn default_round_limit() -> u32 {
    DEFAULT_ROUND_LIMIT
}

fn default_session_timeout() -> u64 {
    DEFAULT_SESSION_TIMEOUT
}

fn default_max_time_skew() -> u64 {
    DEFAULT_MAX_TIME_SKEW
}

fn default_true() -> bool {
    true
}

impl GateConfig {
    pub fn new(realm: impl Into<String>, kdc: impl Into<String>, credential: CredentialSource) -> Self {
        Self {
            realm: realm.into(),
            kdc: kdc.into(),
            service_principal: None,
            credential,
            round_limit: DEFAULT_ROUND_LIMIT,
            session_timeout_secs: DEFAULT_SESSION_TIMEOUT,
            max_time_skew_secs: DEFAULT_MAX_TIME_SKEW,
            mutual_auth: MutualAuth::default(),
            replay_cache: true,
            persist_connection_auth: true,
            reject_status: RejectStatus::default(),
            fallback: FallbackConfig::default(),
            mapper: MapperConfig::default(),
            provision: None,
        }
    }

    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        let config: GateConfig = serde_json::from_str(data)?;
        config.validate()?;

        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;

        Self::from_json(&data)
    }

    /// Checks cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.realm.trim().is_empty() {
            return Err(ConfigError::EmptyRealm);
        }

        if !self.realm.is_ascii() || self.realm.contains(['@', '/', ' ']) {
            return Err(ConfigError::InvalidValue {
                field: "realm",
                reason: format!("{:?} is not a valid Kerberos realm", self.realm),
            });
        }

        self.kdc_url()?;

        if self.session_timeout_secs == 0 || self.session_timeout_secs > MAX_SESSION_TIMEOUT {
            return Err(ConfigError::InvalidValue {
                field: "session_timeout_secs",
                reason: format!("must be between 1 and {MAX_SESSION_TIMEOUT}"),
            });
        }

        if self.max_time_skew_secs > MAX_TIME_SKEW {
            return Err(ConfigError::InvalidValue {
                field: "max_time_skew_secs",
                reason: format!("must not exceed {MAX_TIME_SKEW}"),
            });
        }

        if let Some(principal) = &self.service_principal {
            if principal.is_empty() || principal.contains('@') {
                return Err(ConfigError::InvalidValue {
                    field: "service_principal",
                    reason: format!("{principal:?} must be a realm-less principal name"),
                });
            }
        }

        if self.fallback.enabled && self.fallback.schemes.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "fallback.schemes",
                reason: "fallback is enabled but no scheme is listed".to_owned(),
            });
        }

        if let Some(scheme) = self
            .fallback
            .schemes
            .iter()
            .find(|scheme| scheme.eq_ignore_ascii_case(crate::gate::NEGOTIATE))
        {
            return Err(ConfigError::InvalidValue {
                field: "fallback.schemes",
                reason: format!("{scheme} cannot be a fallback scheme"),
            });
        }

        if let Some(challenge) = self
            .fallback
            .challenges
            .iter()
            .find(|challenge| http::HeaderValue::from_str(challenge).is_err())
        {
            return Err(ConfigError::InvalidValue {
                field: "fallback.challenges",
                reason: format!("{challenge:?} is not a valid header value"),
            });
        }

        Ok(())
    }

    /// Parsed KDC address.
    pub fn kdc_url(&self) -> Result<Url, ConfigError> {
        parse_kdc_url(&self.kdc).ok_or_else(|| ConfigError::InvalidKdc(self.kdc.clone()))
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    /// Realms accepted for client principals: the gate realm plus the mapper allow-list.
    pub fn accepted_realms(&self) -> Vec<String> {
        let mut realms = vec![self.realm.clone()];
        for realm in &self.mapper.allowed_realms {
            if !realms.iter().any(|known| known.eq_ignore_ascii_case(realm)) {
                realms.push(realm.clone());
            }
        }

        realms
    }
}

/// Accepts `host`, `host:port` and `scheme://host:port`.
pub fn parse_kdc_url(kdc: &str) -> Option<Url> {
    if kdc.trim().is_empty() {
        return None;
    }

    let kdc = if kdc.contains("://") {
        kdc.to_owned()
    } else {
        format!("tcp://{kdc}")
    };

    Url::from_str(&kdc).ok().filter(|url| url.host_str().is_some())
}
