use std::fs::OpenOptions;

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const KERBEROS_SSO_LOG_PATH_ENV: &str = "KERBEROS_SSO_LOG_PATH";
const KERBEROS_SSO_LOG_ENV: &str = "KERBEROS_SSO_LOG";

/// Logs go to stderr unless `KERBEROS_SSO_LOG_PATH` names a file.
pub fn init_logging() {
    let filter = EnvFilter::from_env(KERBEROS_SSO_LOG_ENV);

    let Ok(path) = std::env::var(KERBEROS_SSO_LOG_PATH_ENV) else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
        return;
    };

    let file = match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("[kerberos-sso] Couldn't open log file: {e}. File path: {}", path);
            return;
        }
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_thread_names(true)
        .with_writer(file);

    tracing_subscriber::registry().with(fmt_layer).with(filter).init();
}
