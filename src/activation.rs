use std::sync::Arc;

use crate::config::GateConfig;
use crate::credential;
use crate::error::ActivationError;
use crate::gate::{NegotiateGate, NegotiateLayer};
use crate::mapper::IdentityMapper;
use crate::negotiation::{NegotiationEngine, NegotiationPolicy};
use crate::provision::{provision_krb5_conf, OverwritePolicy};

/// Builds the gate middleware from a configuration.
///
/// Called once at startup. Any error is fatal: without a usable credential no layer is built and
/// nothing is served.
#[instrument(level = "debug", skip_all, fields(realm = %config.realm))]
pub fn activate(config: GateConfig) -> Result<NegotiateLayer, ActivationError> {
    config.validate()?;

    let credential = credential::load(&config).inspect_err(|err| {
        error!(error = %err, "Failed to load the server credential");
    })?;

    if let Some(provision) = &config.provision {
        provision_krb5_conf(&provision.directory, &config, OverwritePolicy::from(provision.overwrite))?;
    }

    let engine = NegotiationEngine::new(Arc::new(credential), NegotiationPolicy::from_config(&config));
    let mapper = IdentityMapper::from_config(&config);
    let gate = NegotiateGate::new(engine, mapper, &config);

    info!(
        round_limit = config.round_limit,
        session_timeout = config.session_timeout_secs,
        fallback = config.fallback.enabled,
        "Negotiate gate activated"
    );

    Ok(NegotiateLayer::new(gate))
}
