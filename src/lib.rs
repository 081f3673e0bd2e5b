#![doc = include_str!("../README.md")]

#[macro_use]
extern crate tracing;

mod activation;
pub mod config;
pub mod credential;
pub mod error;
pub mod gate;
pub mod mapper;
pub mod negotiation;
pub mod principal;
pub mod provision;
mod secret;

pub use activation::activate;
pub use config::{CredentialSource, GateConfig};
pub use credential::{ServerCredential, ServiceKey};
pub use error::{ActivationError, ConfigError, CredentialError, MappingError, NegotiationError, ProvisionError};
pub use gate::{FallbackAuth, GateDecision, NegotiateConnection, NegotiateGate, NegotiateLayer, NegotiateService};
pub use mapper::{Identity, IdentityMapper};
pub use negotiation::{NegotiationEngine, NegotiationPolicy, NegotiationResult, NegotiationSession};
pub use principal::{AuthenticatedPrincipal, DelegatedCredential, NameType, ServiceName};
pub use secret::Secret;

/// Kerberos protocol version.
///
/// [5.5.1. KRB_AP_REQ Definition](https://www.rfc-editor.org/rfc/rfc4120#section-5.5.1):
/// ```not_rust
/// pvno            [0] INTEGER (5),
/// ```
pub const KERBEROS_VERSION: u8 = 0x05;
