//! SPNEGO and Kerberos GSS token acceptance.
//!
//! [The Simple and Protected GSS-API Negotiation Mechanism](https://www.rfc-editor.org/rfc/rfc4178)
//! wraps the [Kerberos V5 GSS-API mechanism](https://www.rfc-editor.org/rfc/rfc4121) tokens. The
//! engine only acts as an acceptor: it never contacts a KDC and validates the client AP-REQ with
//! the long-term keys of the [ServerCredential].

mod ap_req;
mod cache;
mod extractors;
pub mod flags;
mod generators;

use std::sync::Arc;
use std::time::{Duration, Instant};

use oid::ObjectIdentifier;
use picky_krb::constants::gss_api::{ACCEPT_COMPLETE, ACCEPT_INCOMPLETE};
use picky_krb::messages::ApReq;
use rand::rngs::OsRng;
use rand::RngCore;
use time::OffsetDateTime;

use self::ap_req::{AcceptedApReq, ApReqValidator};
use self::cache::ReplayCache;
use self::extractors::{decode_ap_req, decode_initial_token, decode_neg_token_resp, is_kerberos_oid, InitialToken};
use self::generators::{
    aes_size, generate_ap_rep, generate_krb_message, generate_mic_token, generate_neg_token_targ, validate_mic_token,
};
use crate::config::{GateConfig, MutualAuth};
use crate::credential::ServerCredential;
use crate::error::NegotiationError;
use crate::principal::AuthenticatedPrincipal;

/// Outcome of one negotiation round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationResult {
    /// The client must send another token. Carries the token to send back.
    Continue(Vec<u8>),
    Complete {
        principal: AuthenticatedPrincipal,
        output_token: Option<Vec<u8>>,
    },
    Reject(NegotiationError),
}

/// Acceptor settings.
#[derive(Debug, Clone)]
pub struct NegotiationPolicy {
    /// Realms a client ticket may be issued for.
    pub accepted_realms: Vec<String>,
    /// Maximum number of `Continue` rounds.
    pub round_limit: u32,
    pub session_timeout: Duration,
    pub max_time_skew: time::Duration,
    pub mutual_auth: MutualAuth,
    pub replay_cache: bool,
}

impl NegotiationPolicy {
    pub fn from_config(config: &GateConfig) -> Self {
        Self {
            accepted_realms: config.accepted_realms(),
            round_limit: config.round_limit,
            session_timeout: config.session_timeout(),
            max_time_skew: time::Duration::seconds(i64::try_from(config.max_time_skew_secs).unwrap_or(i64::MAX)),
            mutual_auth: config.mutual_auth,
            replay_cache: config.replay_cache,
        }
    }
}

#[derive(Debug, Clone)]
enum Stage {
    Initial,
    /// SPNEGO selected a Kerberos mechanism and waits for the AP-REQ.
    AwaitingMechToken {
        mech: ObjectIdentifier,
        encoded_mech_types: Vec<u8>,
    },
    Complete(AuthenticatedPrincipal),
    Rejected(NegotiationError),
}

/// State of one in-progress negotiation.
///
/// A session belongs to a single connection and is driven by [NegotiationEngine::accept_token].
#[derive(Debug)]
pub struct NegotiationSession {
    stage: Stage,
    rounds: u32,
    continues: u32,
    /// `None` when the timeout does not fit in an `Instant`.
    deadline: Option<Instant>,
}

impl NegotiationSession {
    /// Number of tokens consumed so far.
    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.stage, Stage::Complete(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.stage, Stage::Rejected(_))
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    pub fn principal(&self) -> Option<&AuthenticatedPrincipal> {
        match &self.stage {
            Stage::Complete(principal) => Some(principal),
            _ => None,
        }
    }
}

/// How the AP-REQ reached us. Decides the shape of the final token.
enum Framing {
    Spnego {
        mech: ObjectIdentifier,
        encoded_mech_types: Vec<u8>,
        first_response: bool,
        client_mic: Option<Vec<u8>>,
    },
    Kerberos {
        mech: ObjectIdentifier,
    },
}

enum Step {
    Continue(Vec<u8>),
    Complete {
        principal: AuthenticatedPrincipal,
        output_token: Option<Vec<u8>>,
    },
}

/// Kerberos acceptor shared by every connection of a gate.
#[derive(Debug)]
pub struct NegotiationEngine {
    credential: Arc<ServerCredential>,
    policy: NegotiationPolicy,
    replay_cache: Option<ReplayCache>,
}

impl NegotiationEngine {
    pub fn new(credential: Arc<ServerCredential>, policy: NegotiationPolicy) -> Self {
        let replay_cache = policy
            .replay_cache
            .then(|| ReplayCache::new(policy.max_time_skew.saturating_mul(2)));

        Self {
            credential,
            policy,
            replay_cache,
        }
    }

    pub fn credential(&self) -> &ServerCredential {
        &self.credential
    }

    pub fn policy(&self) -> &NegotiationPolicy {
        &self.policy
    }

    pub fn new_session(&self) -> NegotiationSession {
        NegotiationSession {
            stage: Stage::Initial,
            rounds: 0,
            continues: 0,
            deadline: Instant::now().checked_add(self.policy.session_timeout),
        }
    }

    /// Consumes one client token.
    ///
    /// Finished sessions are terminal: a completed session keeps returning its principal and a
    /// rejected one keeps returning the same reason.
    #[instrument(level = "trace", skip_all, fields(round = session.rounds + 1))]
    pub fn accept_token(&self, session: &mut NegotiationSession, input: &[u8]) -> NegotiationResult {
        match &session.stage {
            Stage::Complete(principal) => {
                debug!(%principal, "Negotiation is already complete");

                return NegotiationResult::Complete {
                    principal: principal.clone(),
                    output_token: None,
                };
            }
            Stage::Rejected(err) => {
                debug!(reason = err.reason(), "Negotiation was already rejected");

                return NegotiationResult::Reject(err.clone());
            }
            Stage::Initial | Stage::AwaitingMechToken { .. } => {}
        }

        session.rounds += 1;

        let step = if session.is_expired() {
            Err(NegotiationError::SessionExpired)
        } else {
            self.step(session, input)
        };

        let result = match step {
            Ok(Step::Continue(token)) => {
                session.continues += 1;

                if session.continues > self.policy.round_limit {
                    Err(NegotiationError::RoundLimitExceeded {
                        limit: self.policy.round_limit,
                    })
                } else {
                    debug!(continues = session.continues, "Negotiation continues");

                    Ok(NegotiationResult::Continue(token))
                }
            }
            Ok(Step::Complete {
                principal,
                output_token,
            }) => {
                info!(%principal, rounds = session.rounds, "Negotiation complete");
                session.stage = Stage::Complete(principal.clone());

                Ok(NegotiationResult::Complete {
                    principal,
                    output_token,
                })
            }
            Err(err) => Err(err),
        };

        result.unwrap_or_else(|err| {
            warn!(reason = err.reason(), error = %err, "Negotiation rejected");
            session.stage = Stage::Rejected(err.clone());

            NegotiationResult::Reject(err)
        })
    }

    fn step(&self, session: &mut NegotiationSession, input: &[u8]) -> Result<Step, NegotiationError> {
        match &session.stage {
            Stage::Initial => match decode_initial_token(input)? {
                InitialToken::Spnego {
                    mech_types,
                    encoded_mech_types,
                    mech_token,
                } => {
                    let mech = mech_types
                        .iter()
                        .find(|mech| is_kerberos_oid(mech))
                        .cloned()
                        .ok_or_else(|| {
                            NegotiationError::UnsupportedMechanism("no Kerberos mechanism is offered".to_owned())
                        })?;
                    let preferred = mech_types.first() == Some(&mech);

                    match mech_token {
                        // The optimistic token is only usable when it is for the mechanism we selected.
                        Some(mech_token) if preferred => {
                            debug!("Processing optimistic Kerberos token");
                            let (_, ap_req) = decode_ap_req(&mech_token)?;

                            self.complete(
                                ap_req,
                                Framing::Spnego {
                                    mech,
                                    encoded_mech_types,
                                    first_response: true,
                                    client_mic: None,
                                },
                            )
                        }
                        _ => {
                            let mech_name: String = (&mech).into();
                            debug!(mech = %mech_name, "Requesting Kerberos mech token");
                            let token = generate_neg_token_targ(&ACCEPT_INCOMPLETE, Some(mech.clone()), None, None)?;
                            session.stage = Stage::AwaitingMechToken {
                                mech,
                                encoded_mech_types,
                            };

                            Ok(Step::Continue(token))
                        }
                    }
                }
                InitialToken::Kerberos(token) => {
                    let (mech, ap_req) = decode_ap_req(&token)?;

                    self.complete(ap_req, Framing::Kerberos { mech })
                }
            },
            Stage::AwaitingMechToken {
                mech,
                encoded_mech_types,
            } => {
                let response = decode_neg_token_resp(input)?;

                let Some(response_token) = response.response_token else {
                    debug!("NegTokenResp without a response token");

                    return Ok(Step::Continue(generate_neg_token_targ(
                        &ACCEPT_INCOMPLETE,
                        None,
                        None,
                        None,
                    )?));
                };

                let (_, ap_req) = decode_ap_req(&response_token)?;

                self.complete(
                    ap_req,
                    Framing::Spnego {
                        mech: mech.clone(),
                        encoded_mech_types: encoded_mech_types.clone(),
                        first_response: false,
                        client_mic: response.mech_list_mic,
                    },
                )
            }
            Stage::Complete(_) | Stage::Rejected(_) => {
                Err(NegotiationError::malformed("negotiation is already finished"))
            }
        }
    }

    fn complete(&self, ap_req: ApReq, framing: Framing) -> Result<Step, NegotiationError> {
        let validator = ApReqValidator {
            credential: &self.credential,
            accepted_realms: &self.policy.accepted_realms,
            max_time_skew: self.policy.max_time_skew,
            replay_cache: self.replay_cache.as_ref(),
            now: OffsetDateTime::now_utc(),
        };
        let accepted = validator.accept(&ap_req)?;

        let seq_number = OsRng.next_u32();
        let mech = match &framing {
            Framing::Spnego { mech, .. } | Framing::Kerberos { mech } => mech.clone(),
        };
        let response_token = self.generate_response_token(&accepted, mech, seq_number)?;

        let output_token = match framing {
            Framing::Kerberos { .. } => response_token,
            Framing::Spnego {
                mech,
                encoded_mech_types,
                first_response,
                client_mic,
            } => {
                let (key, key_type) = accepted.context_key();
                let aes_size = aes_size(key_type);

                let mech_list_mic = match client_mic {
                    Some(client_mic) => {
                        validate_mic_token(&client_mic, &encoded_mech_types, key, &aes_size)?;
                        debug!("mechListMIC is valid");

                        Some(generate_mic_token(
                            u64::from(seq_number),
                            encoded_mech_types,
                            key,
                            &aes_size,
                        )?)
                    }
                    None => None,
                };

                Some(generate_neg_token_targ(
                    &ACCEPT_COMPLETE,
                    first_response.then_some(mech),
                    response_token,
                    mech_list_mic,
                )?)
            }
        };

        Ok(Step::Complete {
            principal: accepted.principal,
            output_token,
        })
    }

    fn generate_response_token(
        &self,
        accepted: &AcceptedApReq,
        mech: ObjectIdentifier,
        seq_number: u32,
    ) -> Result<Option<Vec<u8>>, NegotiationError> {
        if !accepted.mutual || self.policy.mutual_auth == MutualAuth::Never {
            return Ok(None);
        }

        // [Generation of a KRB_AP_REP Message](https://www.rfc-editor.org/rfc/rfc4120#section-3.2.4):
        // > if mutual authentication is being performed, the KRB_AP_REQ message will have MUTUAL-REQUIRED set in its
        // > ap-options field, and a KRB_AP_REP message is required in response.
        let ap_rep = generate_ap_rep(
            accepted.session_key.as_ref(),
            accepted.session_key_type,
            accepted.ctime.clone(),
            accepted.cusec.clone(),
            seq_number,
        )?;

        Ok(Some(generate_krb_message(mech, ap_rep)?))
    }
}
