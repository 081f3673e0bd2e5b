//! HTTP `Negotiate` authentication.
//!
//! [SPNEGO-based Kerberos and NTLM HTTP Authentication](https://www.rfc-editor.org/rfc/rfc4559):
//! the server answers an unauthenticated request with `401` and `WWW-Authenticate: Negotiate`,
//! the client retries with `Authorization: Negotiate <base64 token>`, and the two sides exchange
//! tokens in `401` responses until the context is established.

mod connection;
mod layer;

use std::mem;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use http::{HeaderMap, HeaderValue, Response, StatusCode};

pub use self::connection::NegotiateConnection;
use self::connection::ConnectionState;
pub use self::layer::{NegotiateLayer, NegotiateService};
use crate::config::{FallbackConfig, GateConfig, RejectStatus};
use crate::error::{MappingError, NegotiationError};
use crate::mapper::{Identity, IdentityMapper};
use crate::negotiation::{NegotiationEngine, NegotiationResult};

/// Authentication scheme name.
pub const NEGOTIATE: &str = "Negotiate";

/// Request extension set when a request is handed to a fallback authenticator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackAuth {
    /// Scheme of the request `Authorization` header, e.g. `Basic`.
    pub scheme: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    Negotiation(NegotiationError),
    Mapping(MappingError),
}

/// What the gate does with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Pass downstream with the identity attached.
    Authenticated {
        identity: Identity,
        /// Final token for the client, sent in the downstream response.
        output_token: Option<Vec<u8>>,
    },
    /// `401` with a `Negotiate` challenge.
    Challenge { output_token: Option<Vec<u8>> },
    Rejected(RejectReason),
    /// Pass downstream unauthenticated.
    Fallback { scheme: String },
}

enum Authorization<'a> {
    Missing,
    Negotiate(&'a str),
    Other(&'a str),
    Invalid,
}

fn parse_authorization(headers: &HeaderMap) -> Authorization<'_> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Authorization::Missing;
    };
    let Ok(value) = value.to_str() else {
        return Authorization::Invalid;
    };

    let value = value.trim();
    let (scheme, credentials) = value.split_once(' ').unwrap_or((value, ""));

    if scheme.eq_ignore_ascii_case(NEGOTIATE) {
        Authorization::Negotiate(credentials.trim())
    } else if scheme.is_empty() {
        Authorization::Invalid
    } else {
        Authorization::Other(scheme)
    }
}

/// Drives the `Negotiate` handshake of each connection.
#[derive(Debug)]
pub struct NegotiateGate {
    engine: NegotiationEngine,
    mapper: IdentityMapper,
    persist_connection_auth: bool,
    reject_status: RejectStatus,
    fallback: FallbackConfig,
    fallback_challenges: Vec<HeaderValue>,
}

impl NegotiateGate {
    pub fn new(engine: NegotiationEngine, mapper: IdentityMapper, config: &GateConfig) -> Self {
        let fallback_challenges = if config.fallback.enabled {
            config
                .fallback
                .challenges
                .iter()
                .filter_map(|challenge| HeaderValue::from_str(challenge).ok())
                .collect()
        } else {
            Vec::new()
        };

        Self {
            engine,
            mapper,
            persist_connection_auth: config.persist_connection_auth,
            reject_status: config.reject_status,
            fallback: config.fallback.clone(),
            fallback_challenges,
        }
    }

    pub fn engine(&self) -> &NegotiationEngine {
        &self.engine
    }

    /// Decides what to do with a request.
    ///
    /// Without a connection handle the negotiation state only lives for this request, so only
    /// single round handshakes can succeed.
    #[instrument(level = "trace", skip_all)]
    pub fn evaluate(&self, connection: Option<&NegotiateConnection>, headers: &HeaderMap) -> GateDecision {
        let mut guard = connection.map(NegotiateConnection::lock);
        let mut ephemeral = ConnectionState::Idle;
        let state = match guard.as_deref_mut() {
            Some(state) => state,
            None => &mut ephemeral,
        };

        match state {
            ConnectionState::Authenticated(identity) => {
                trace!(name = %identity.name, "Connection is already authenticated");

                return GateDecision::Authenticated {
                    identity: identity.clone(),
                    output_token: None,
                };
            }
            ConnectionState::Rejected(err) => {
                debug!(reason = err.reason(), "Connection was rejected earlier");

                return GateDecision::Rejected(RejectReason::Negotiation(err.clone()));
            }
            ConnectionState::Idle | ConnectionState::Negotiating(_) => {}
        }

        let token = match parse_authorization(headers) {
            Authorization::Missing => {
                debug!("No Authorization header, sending Negotiate challenge");

                return GateDecision::Challenge { output_token: None };
            }
            Authorization::Other(scheme) => {
                if self.fallback.enabled
                    && self
                        .fallback
                        .schemes
                        .iter()
                        .any(|fallback| fallback.eq_ignore_ascii_case(scheme))
                {
                    debug!(scheme, "Passing request to the fallback authenticator");

                    return GateDecision::Fallback {
                        scheme: scheme.to_owned(),
                    };
                }

                debug!(scheme, "Unsupported authorization scheme");

                return GateDecision::Challenge { output_token: None };
            }
            Authorization::Invalid => Err(NegotiationError::malformed("invalid Authorization header")),
            Authorization::Negotiate(token) => STANDARD
                .decode(token)
                .map_err(|err| NegotiationError::malformed(format!("invalid base64 token: {err}"))),
        };

        let token = match token {
            Ok(token) => token,
            Err(err) => {
                warn!(reason = err.reason(), error = %err, "Negotiation rejected");
                *state = ConnectionState::Rejected(err.clone());

                return GateDecision::Rejected(RejectReason::Negotiation(err));
            }
        };

        let mut session = match mem::take(state) {
            ConnectionState::Negotiating(session) => session,
            _ => self.engine.new_session(),
        };

        match self.engine.accept_token(&mut session, &token) {
            NegotiationResult::Continue(output_token) => {
                if connection.is_none() {
                    debug!("Multi-round negotiation needs a NegotiateConnection on the request");
                }
                *state = ConnectionState::Negotiating(session);

                GateDecision::Challenge {
                    output_token: Some(output_token),
                }
            }
            NegotiationResult::Complete {
                principal,
                output_token,
            } => match self.mapper.map(&principal) {
                Ok(identity) => {
                    debug!(%principal, name = %identity.name, "Principal mapped");

                    if self.persist_connection_auth {
                        *state = ConnectionState::Authenticated(identity.clone());
                    }

                    GateDecision::Authenticated {
                        identity,
                        output_token,
                    }
                }
                Err(err) => {
                    warn!(%principal, error = %err, "Principal mapping failed");

                    GateDecision::Rejected(RejectReason::Mapping(err))
                }
            },
            NegotiationResult::Reject(err) => {
                *state = ConnectionState::Rejected(err.clone());

                GateDecision::Rejected(RejectReason::Negotiation(err))
            }
        }
    }

    /// Response for a rejected negotiation or mapping.
    ///
    /// Fallback challenges are never offered after a rejection.
    pub fn rejection<B: Default>(&self, reason: &RejectReason) -> Response<B> {
        let mut response = Response::new(B::default());

        match reason {
            RejectReason::Negotiation(_) if self.reject_status == RejectStatus::Unauthorized => {
                *response.status_mut() = StatusCode::UNAUTHORIZED;
                response
                    .headers_mut()
                    .insert(WWW_AUTHENTICATE, HeaderValue::from_static(NEGOTIATE));
            }
            RejectReason::Negotiation(_) | RejectReason::Mapping(_) => {
                *response.status_mut() = StatusCode::FORBIDDEN;
            }
        }

        response
    }

    /// `401` response carrying `WWW-Authenticate: Negotiate [token]`.
    ///
    /// The initial challenge also lists the fallback challenges.
    pub fn challenge<B: Default>(&self, output_token: Option<&[u8]>) -> Response<B> {
        let mut response = Response::new(B::default());
        *response.status_mut() = StatusCode::UNAUTHORIZED;

        let headers = response.headers_mut();
        if let Some(value) = negotiate_header(output_token) {
            headers.append(WWW_AUTHENTICATE, value);
        }
        if output_token.is_none() {
            for challenge in &self.fallback_challenges {
                headers.append(WWW_AUTHENTICATE, challenge.clone());
            }
        }

        response
    }
}

/// `Negotiate` or `Negotiate <base64 token>`.
pub(crate) fn negotiate_header(token: Option<&[u8]>) -> Option<HeaderValue> {
    match token {
        Some(token) => HeaderValue::try_from(format!("{NEGOTIATE} {}", STANDARD.encode(token))).ok(),
        None => Some(HeaderValue::from_static(NEGOTIATE)),
    }
}
