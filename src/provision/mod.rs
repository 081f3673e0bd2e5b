//! One-time generation of the Kerberos client configuration next to the service.

mod krb5_conf;

use std::fs;
use std::path::{Path, PathBuf};

pub use self::krb5_conf::Krb5Conf;
use crate::config::{parse_kdc_url, GateConfig};
use crate::error::ProvisionError;

pub const KRB5_CONF_FILE_NAME: &str = "krb5.conf";

const ENCTYPES: &str = "aes256-cts-hmac-sha1-96 aes128-cts-hmac-sha1-96";

/// What to do with an existing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwritePolicy {
    Keep,
    Overwrite,
}

impl From<bool> for OverwritePolicy {
    fn from(overwrite: bool) -> Self {
        if overwrite {
            OverwritePolicy::Overwrite
        } else {
            OverwritePolicy::Keep
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Created,
    /// The file existed and was left untouched.
    Kept,
    Replaced,
}

/// `host` or `host:port` as written in the `[realms]` section.
fn kdc_address(config: &GateConfig) -> String {
    parse_kdc_url(&config.kdc)
        .and_then(|url| {
            url.host_str().map(|host| match url.port() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_owned(),
            })
        })
        .unwrap_or_else(|| config.kdc.clone())
}

pub fn render_krb5_conf(config: &GateConfig) -> String {
    format!(
        "[libdefaults]\n\
         \tdefault_realm = {realm}\n\
         \tdefault_tkt_enctypes = {ENCTYPES}\n\
         \tdefault_tgs_enctypes = {ENCTYPES}\n\
         \tpermitted_enctypes = {ENCTYPES}\n\
         \tudp_preference_limit = 1\n\
         \n\
         [realms]\n\
         \t{realm} = {{\n\
         \t\tkdc = {kdc}\n\
         \t}}\n\
         \n\
         [appdefaults]\n\
         \tforwardable = true\n",
        realm = config.realm,
        kdc = kdc_address(config),
    )
}

/// Writes `krb5.conf` into `directory`.
///
/// An existing file is only replaced with [OverwritePolicy::Overwrite]. Running the step twice
/// with [OverwritePolicy::Keep] leaves the first result in place.
#[instrument(level = "debug", skip(config), fields(realm = %config.realm))]
pub fn provision_krb5_conf(
    directory: &Path,
    config: &GateConfig,
    policy: OverwritePolicy,
) -> Result<ProvisionOutcome, ProvisionError> {
    if !directory.is_dir() {
        return Err(ProvisionError::MissingDirectory(directory.to_owned()));
    }

    let path = krb5_conf_path(directory);
    let exists = path.exists();

    if exists && policy == OverwritePolicy::Keep {
        info!(path = %path.display(), "Keeping existing krb5.conf");

        return Ok(ProvisionOutcome::Kept);
    }

    fs::write(&path, render_krb5_conf(config)).map_err(|source| ProvisionError::Write {
        path: path.clone(),
        source,
    })?;

    let outcome = if exists {
        ProvisionOutcome::Replaced
    } else {
        ProvisionOutcome::Created
    };
    info!(path = %path.display(), ?outcome, "krb5.conf provisioned");

    Ok(outcome)
}

pub fn krb5_conf_path(directory: &Path) -> PathBuf {
    directory.join(KRB5_CONF_FILE_NAME)
}
