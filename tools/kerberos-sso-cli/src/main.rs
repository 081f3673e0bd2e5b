#![doc = include_str!("../README.md")]

mod cli;
mod logging;

use std::fs;
use std::io::{Error, ErrorKind, Result};
use std::path::Path;

use kerberos_sso::credential::{self, Keytab, KeytabEntry};
use kerberos_sso::provision::{self, Krb5Conf, OverwritePolicy};
use kerberos_sso::{GateConfig, ServiceName};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::cli::{Add, Check, KerberosSso, KerberosSsoCmd, Keytab as KeytabArgs, KeytabCmd, List, Provision};

/// `KRB5_NT_PRINCIPAL`, the name type MIT `ktutil` writes.
const NT_PRINCIPAL: u32 = 1;

fn load_config(path: &Path) -> Result<GateConfig> {
    GateConfig::from_json_file(path).map_err(|err| Error::new(ErrorKind::InvalidData, err))
}

fn read_keytab(path: &Path) -> Result<Keytab> {
    let data = fs::read(path)?;

    Keytab::decode(&data).map_err(|err| Error::new(ErrorKind::InvalidData, err))
}

fn provision_krb5_conf(Provision {
    config,
    directory,
    overwrite,
}: Provision) -> Result<()> {
    let config = load_config(&config)?;

    let (directory, overwrite) = match (directory, &config.provision) {
        (Some(directory), _) => (directory, overwrite),
        (None, Some(provision)) => (provision.directory.clone(), overwrite || provision.overwrite),
        (None, None) => {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "no target directory: pass --directory or set provision.directory",
            ))
        }
    };

    let outcome = provision::provision_krb5_conf(&directory, &config, OverwritePolicy::from(overwrite))
        .map_err(Error::other)?;

    println!("{}: {:?}", provision::krb5_conf_path(&directory).display(), outcome);

    Ok(())
}

fn list_keytab(List { file }: List) -> Result<()> {
    let keytab = read_keytab(&file)?;

    println!("KVNO Timestamp                      Principal");
    println!("---- ------------------------------ ---------------------------------------------");
    for entry in &keytab.entries {
        let timestamp = OffsetDateTime::from_unix_timestamp(i64::from(entry.timestamp))
            .ok()
            .and_then(|timestamp| timestamp.format(&Rfc3339).ok())
            .unwrap_or_else(|| entry.timestamp.to_string());

        println!(
            "{:>4} {:<30} {}@{} (etype {})",
            entry.kvno,
            timestamp,
            entry.principal_name(),
            entry.realm,
            entry.key_type
        );
    }

    Ok(())
}

fn add_keytab_entries(Add {
    file,
    principal,
    password,
    kvno,
    salt,
}: Add) -> Result<()> {
    let (name, realm) = principal.rsplit_once('@').ok_or_else(|| {
        Error::new(
            ErrorKind::InvalidInput,
            format!("principal must include the realm: {principal}"),
        )
    })?;
    let name = ServiceName::parse(name).map_err(|err| Error::new(ErrorKind::InvalidInput, err))?;

    let mut keytab = if file.exists() {
        read_keytab(&file)?
    } else {
        Keytab::default()
    };

    let kvno = kvno.unwrap_or(1);
    let timestamp = u32::try_from(OffsetDateTime::now_utc().unix_timestamp()).unwrap_or_default();

    let keys = credential::derive_password_keys(&name, &password, salt.as_deref(), realm).map_err(Error::other)?;
    for key in keys {
        tracing::debug!(principal = %key.principal, kvno, etype = key.etype, "Adding keytab entry");

        keytab.entries.push(KeytabEntry {
            realm: realm.to_owned(),
            components: key.principal.components().to_vec(),
            name_type: NT_PRINCIPAL,
            timestamp,
            kvno,
            key_type: u16::from(key.etype),
            key: key.key,
        });
    }

    fs::write(&file, keytab.encode().map_err(Error::other)?)?;

    println!("{} entries in {}", keytab.entries.len(), file.display());

    Ok(())
}

fn check(Check { config }: Check) -> Result<()> {
    let config = load_config(&config)?;
    let credential = credential::load(&config).map_err(Error::other)?;

    println!("realm: {}", credential.realm());
    for key in credential.keys() {
        match key.kvno {
            Some(kvno) => println!("key: {} kvno {} etype {}", key.principal, kvno, key.etype),
            None => println!("key: {} (password) etype {}", key.principal, key.etype),
        }
    }

    if let Some(provision) = &config.provision {
        let path = provision::krb5_conf_path(&provision.directory);

        match fs::read_to_string(&path) {
            Ok(data) => {
                let krb5_conf = Krb5Conf::parse(&data);
                let default_realm = krb5_conf.get_value(&["libdefaults", "default_realm"]);

                if default_realm.map_or(true, |realm| !realm.eq_ignore_ascii_case(&config.realm)) {
                    println!(
                        "warning: {} has default_realm {:?}, expected {}",
                        path.display(),
                        default_realm,
                        config.realm
                    );
                }
                if krb5_conf.get_values(&["realms", &config.realm, "kdc"]).is_empty() {
                    println!("warning: {} lists no KDC for {}", path.display(), config.realm);
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                println!("{} is not provisioned yet", path.display());
            }
            Err(err) => return Err(err),
        }
    }

    println!("ok");

    Ok(())
}

fn run(flags: KerberosSso) -> Result<()> {
    logging::init_logging();

    match flags.subcommand {
        KerberosSsoCmd::Provision(args) => provision_krb5_conf(args),
        KerberosSsoCmd::Keytab(KeytabArgs { subcommand }) => match subcommand {
            KeytabCmd::List(args) => list_keytab(args),
            KeytabCmd::Add(args) => add_keytab_entries(args),
        },
        KerberosSsoCmd::Check(args) => check(args),
    }
}

fn main() -> Result<()> {
    match KerberosSso::from_env() {
        Ok(flags) => run(flags),
        Err(err) => err.exit(),
    }
}
