use picky_krb::constants::types::AP_REQ_MSG_TYPE;
use picky_krb::data_types::{AuthenticatorInner, EncTicketPartInner, KerberosTime, Microseconds, PrincipalName};
use picky_krb::messages::ApReq;
use time::{Duration, OffsetDateTime};

use super::cache::{ReplayCache, ReplayRecord};
use super::extractors::{decrypt_ap_req_authenticator, decrypt_ap_req_ticket, integer_value, parse_gss_checksum};
use super::flags::{ApOptions, GssFlags};
use crate::credential::ServerCredential;
use crate::error::NegotiationError;
use crate::principal::{AuthenticatedPrincipal, DelegatedCredential};
use crate::{Secret, KERBEROS_VERSION};

/// Everything the acceptor needs to validate one AP-REQ.
pub(super) struct ApReqValidator<'a> {
    pub credential: &'a ServerCredential,
    pub accepted_realms: &'a [String],
    pub max_time_skew: Duration,
    pub replay_cache: Option<&'a ReplayCache>,
    pub now: OffsetDateTime,
}

/// A validated AP-REQ.
#[derive(Debug)]
pub(super) struct AcceptedApReq {
    pub principal: AuthenticatedPrincipal,
    pub session_key: Secret<Vec<u8>>,
    pub session_key_type: u8,
    /// Initiator subkey from the authenticator, if any.
    pub subkey: Option<(Secret<Vec<u8>>, u8)>,
    pub mutual: bool,
    pub ctime: KerberosTime,
    pub cusec: Microseconds,
}

impl AcceptedApReq {
    /// The sub-session key is always preferred over the session key.
    pub fn context_key(&self) -> (&[u8], u8) {
        match &self.subkey {
            Some((key, key_type)) => (key.as_ref().as_slice(), *key_type),
            None => (self.session_key.as_ref().as_slice(), self.session_key_type),
        }
    }
}

fn principal_to_string(name: &PrincipalName) -> String {
    name.name_string
        .0
         .0
        .iter()
        .map(|component| component.to_string())
        .collect::<Vec<_>>()
        .join("/")
}

fn key_type(raw: &[u8]) -> Result<u8, NegotiationError> {
    integer_value(raw)
        .and_then(|value| u8::try_from(value).ok())
        .ok_or_else(|| NegotiationError::malformed("invalid encryption type"))
}

impl ApReqValidator<'_> {
    /// [Receipt of KRB_AP_REQ Message](https://www.rfc-editor.org/rfc/rfc4120#section-3.2.3)
    #[instrument(level = "trace", skip_all, err)]
    pub fn accept(&self, ap_req: &ApReq) -> Result<AcceptedApReq, NegotiationError> {
        let ap_req_inner = &ap_req.0;

        if ap_req_inner.pvno.0 .0 != [KERBEROS_VERSION] {
            return Err(NegotiationError::malformed(format!(
                "KRB_AP_ERR_BADVERSION: invalid protocol version: {:?}",
                ap_req_inner.pvno.0 .0
            )));
        }
        if ap_req_inner.msg_type.0 .0 != [AP_REQ_MSG_TYPE] {
            return Err(NegotiationError::malformed(format!(
                "KRB_AP_ERR_MSG_TYPE: invalid message type: {:?}",
                ap_req_inner.msg_type.0 .0
            )));
        }

        let ticket = &ap_req_inner.ticket.0 .0;

        let ticket_realm = ticket.realm.0 .0.as_utf8();
        if !ticket_realm.eq_ignore_ascii_case(self.credential.realm()) {
            return Err(NegotiationError::RealmMismatch {
                expected: self.credential.realm().to_owned(),
                actual: ticket_realm.to_owned(),
            });
        }

        let etype = key_type(&ticket.enc_part.0.etype.0 .0)?;
        let kvno = ticket
            .enc_part
            .0
            .kvno
            .0
            .as_ref()
            .and_then(|kvno| integer_value(&kvno.0 .0));
        let service_key = self.credential.select_key(&ticket.sname.0, etype, kvno)?;
        debug!(sname = %service_key.principal, etype, ?kvno, "Service key selected");

        let EncTicketPartInner {
            flags: _,
            key,
            crealm: ticket_crealm,
            cname: ticket_cname,
            transited: _,
            auth_time,
            starttime,
            endtime,
            renew_till: _,
            caddr: _,
            authorization_data: _,
        } = decrypt_ap_req_ticket(service_key.key.as_ref(), ap_req)?.0;

        let client_realm = ticket_crealm.0 .0.as_utf8().to_owned();
        if !self
            .accepted_realms
            .iter()
            .any(|realm| realm.eq_ignore_ascii_case(&client_realm))
        {
            return Err(NegotiationError::RealmMismatch {
                expected: self.accepted_realms.join(", "),
                actual: client_realm,
            });
        }

        let ticket_start_time = OffsetDateTime::try_from(
            starttime
                .0
                .map(|start_time| start_time.0)
                // [Tickets](https://www.rfc-editor.org/rfc/rfc4120#section-5.3):
                // > If the starttime field is absent from the ticket, then the authtime field SHOULD be used in its
                // > place to determine the life of the ticket.
                .unwrap_or(auth_time.0)
                .0,
        )
        .map_err(|err| NegotiationError::malformed(format!("ticket start time is not valid: {err:?}")))?;
        if self
            .now
            .checked_add(self.max_time_skew)
            .is_some_and(|latest_start| ticket_start_time > latest_start)
        {
            return Err(NegotiationError::ExpiredTicket(
                "KRB_AP_ERR_TKT_NYV: ticket start time is greater than current time + max time skew".to_owned(),
            ));
        }

        let ticket_end_time = OffsetDateTime::try_from(endtime.0 .0)
            .map_err(|err| NegotiationError::malformed(format!("ticket end time is not valid: {err:?}")))?;
        if ticket_end_time
            .checked_add(self.max_time_skew)
            .is_some_and(|latest_end| self.now > latest_end)
        {
            return Err(NegotiationError::ExpiredTicket(
                "current time is greater than ticket end time + max time skew".to_owned(),
            ));
        }

        let session_key = Secret::new(key.0.key_value.0 .0);
        let session_key_type = key_type(&key.0.key_type.0 .0)?;

        let AuthenticatorInner {
            authenticator_vno: _,
            crealm,
            cname,
            cksum,
            cusec,
            ctime,
            subkey,
            seq_number: _,
            authorization_data: _,
        } = decrypt_ap_req_authenticator(session_key.as_ref(), ap_req)?.0;

        // The name and realm of the client from the ticket are compared against the same fields in the authenticator.
        if ticket_crealm.0 != crealm.0 || ticket_cname.0 != cname.0 {
            return Err(NegotiationError::malformed(
                "KRB_AP_ERR_BADMATCH: the name and realm of the client in ticket and authenticator do not match",
            ));
        }

        let client_time = OffsetDateTime::try_from(ctime.0 .0.clone())
            .map_err(|err| NegotiationError::malformed(format!("client time is not valid: {err:?}")))?;
        if (self.now - client_time).abs() > self.max_time_skew {
            return Err(NegotiationError::ClockSkew(
                "invalid authenticator ctime: time skew is too big".to_owned(),
            ));
        }

        let client = AuthenticatedPrincipal::from_principal_name(&cname.0, client_realm.clone(), None);

        if let Some(replay_cache) = self.replay_cache {
            let record = ReplayRecord {
                client: client.to_string(),
                server: principal_to_string(&ticket.sname.0),
                ctime: client_time.unix_timestamp(),
                cusec: integer_value(&cusec.0 .0).unwrap_or_default(),
            };

            if !replay_cache.check_and_insert(record, self.now) {
                return Err(NegotiationError::ReplayDetected(client.to_string()));
            }
        }

        let mut mutual = ApOptions::from(&ap_req_inner.ap_options.0 .0).contains(ApOptions::MUTUAL_REQUIRED);
        let mut delegated: Option<DelegatedCredential> = None;

        if let Some(checksum) = cksum.0 {
            if let Some(gss_checksum) = parse_gss_checksum(&checksum.0)? {
                mutual |= gss_checksum.flags.contains(GssFlags::GSS_C_MUTUAL_FLAG);
                delegated = gss_checksum.delegated;
            }
        }

        let subkey = subkey
            .0
            .map(|key| -> Result<_, NegotiationError> {
                Ok((Secret::new(key.0.key_value.0 .0), key_type(&key.0.key_type.0 .0)?))
            })
            .transpose()?;

        debug!(
            client = %client,
            mutual,
            delegated = delegated.is_some(),
            "ApReq Ticket and Authenticator are valid"
        );

        Ok(AcceptedApReq {
            principal: AuthenticatedPrincipal::from_principal_name(&cname.0, client_realm, delegated),
            session_key,
            session_key_type,
            subkey,
            mutual,
            ctime: ctime.0,
            cusec: cusec.0,
        })
    }
}
