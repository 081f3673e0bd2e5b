use byteorder::{ByteOrder, LittleEndian};
use oid::ObjectIdentifier;
use picky::oids;
use picky_asn1::tag::Tag;
use picky_asn1::wrapper::{
    Asn1SequenceOf, ExplicitContextTag1, ExplicitContextTag2, ExplicitContextTag3, ObjectIdentifierAsn1,
    OctetStringAsn1,
};
use picky_asn1_der::Asn1RawDer;
use picky_krb::constants::gss_api::AP_REQ_TOKEN_ID;
use picky_krb::constants::key_usages::{AP_REQ_AUTHENTICATOR, TICKET_REP};
use picky_krb::crypto::CipherSuite;
use picky_krb::data_types::{Authenticator, Checksum, EncTicketPart};
use picky_krb::gss_api::{GssApiNegInit, KrbMessage, NegTokenInit};
use picky_krb::messages::ApReq;
use serde::Deserialize;

use super::flags::GssFlags;
use crate::error::NegotiationError;
use crate::principal::DelegatedCredential;

/// RFC 4121 authenticator checksum type.
pub(super) const GSS_CHECKSUM_TYPE: u32 = 0x8003;
const NTLM_SIGNATURE: &[u8] = b"NTLMSSP\0";

/// First token a client sends on a connection.
#[derive(Debug)]
pub(super) enum InitialToken {
    /// SPNEGO `NegTokenInit`.
    Spnego {
        mech_types: Vec<ObjectIdentifier>,
        /// DER encoding of the mech type list, covered by the `mechListMIC`.
        encoded_mech_types: Vec<u8>,
        mech_token: Option<Vec<u8>>,
    },
    /// Bare Kerberos GSS token carrying an AP-REQ.
    Kerberos(Vec<u8>),
}

/// Response token and `mechListMIC` of a SPNEGO `NegTokenResp`.
pub(super) struct NegTokenResp {
    pub response_token: Option<Vec<u8>>,
    pub mech_list_mic: Option<Vec<u8>>,
}

pub(super) fn is_kerberos_oid(oid: &ObjectIdentifier) -> bool {
    *oid == oids::krb5() || *oid == oids::ms_krb5()
}

/// Classifies the first token of a negotiation.
#[instrument(level = "trace", skip_all, err)]
pub(super) fn decode_initial_token(data: &[u8]) -> Result<InitialToken, NegotiationError> {
    if data.starts_with(NTLM_SIGNATURE) {
        return Err(NegotiationError::UnsupportedMechanism("NTLM".to_owned()));
    }

    match data.first() {
        // [APPLICATION 0] InitialContextToken
        Some(0x60) => {}
        // [1] NegTokenResp
        Some(0xa1) => {
            return Err(NegotiationError::malformed(
                "got NegTokenResp but no negotiation is in progress",
            ))
        }
        _ => return Err(NegotiationError::malformed("unknown token type")),
    }

    let mech = token_mech(data)?;

    if mech == oids::spnego() {
        // `ApplicationTag0` unwraps its inner decode, so the SPNEGO body is decoded as a plain SEQUENCE.
        let mut sequence = data.to_vec();
        sequence[0] = Tag::SEQUENCE.inner();

        let token: GssApiNegInit = picky_asn1_der::from_bytes(&sequence)
            .map_err(|err| NegotiationError::malformed(format!("invalid NegTokenInit: {err:?}")))?;

        let NegTokenInit {
            mech_types,
            req_flags: _,
            mech_token,
            mech_list_mic: _,
        } = token.neg_token_init.0;

        let mech_types = mech_types
            .0
            .ok_or_else(|| NegotiationError::malformed("mech_types is missing in GssApiNegInit message"))?
            .0;
        let encoded_mech_types = picky_asn1_der::to_vec(&mech_types)?;

        return Ok(InitialToken::Spnego {
            mech_types: mech_types.0.into_iter().map(|mech_type| mech_type.0).collect(),
            encoded_mech_types,
            mech_token: mech_token.0.map(|mech_token| mech_token.0 .0),
        });
    }

    if !is_kerberos_oid(&mech) {
        let mech: String = mech.into();

        return Err(NegotiationError::UnsupportedMechanism(mech));
    }

    decode_ap_req(data)?;
    trace!("Raw Kerberos token");

    Ok(InitialToken::Kerberos(data.to_vec()))
}

/// Reads the `thisMech` OID that follows the `[APPLICATION 0]` header of an InitialContextToken.
fn token_mech(data: &[u8]) -> Result<ObjectIdentifier, NegotiationError> {
    #[derive(Deserialize)]
    struct ThisMech {
        oid: ObjectIdentifierAsn1,
    }

    let mut reader = data;
    let ThisMech { oid } = ThisMech::deserialize(&mut picky_asn1_der::Deserializer::new_from_reader(
        &mut reader,
        data.len(),
    ))
    .map_err(|err| NegotiationError::malformed(format!("invalid InitialContextToken header: {err:?}")))?;

    Ok(oid.0)
}

/// Decodes SPNEGO `NegTokenResp`.
///
/// The fields are walked one TLV at a time: picky's `NegTokenTarg` keeps the OCTET STRING header of
/// `responseToken` when `negState` is absent.
pub(super) fn decode_neg_token_resp(data: &[u8]) -> Result<NegTokenResp, NegotiationError> {
    let fields: ExplicitContextTag1<Asn1SequenceOf<Asn1RawDer>> = picky_asn1_der::from_bytes(data)?;

    let mut neg_token_resp = NegTokenResp {
        response_token: None,
        mech_list_mic: None,
    };

    for Asn1RawDer(field) in fields.0 .0 {
        match field.first() {
            // negState, supportedMech
            Some(0xa0 | 0xa1) => {}
            Some(0xa2) => {
                let token: ExplicitContextTag2<OctetStringAsn1> = picky_asn1_der::from_bytes(&field)?;
                neg_token_resp.response_token = Some(token.0 .0);
            }
            Some(0xa3) => {
                let mic: ExplicitContextTag3<OctetStringAsn1> = picky_asn1_der::from_bytes(&field)?;
                neg_token_resp.mech_list_mic = Some(mic.0 .0);
            }
            _ => return Err(NegotiationError::malformed("unexpected NegTokenResp field")),
        }
    }

    Ok(neg_token_resp)
}

/// Decodes a Kerberos GSS token and extracts [ApReq] Kerberos message.
pub(super) fn decode_ap_req(data: &[u8]) -> Result<(ObjectIdentifier, ApReq), NegotiationError> {
    let krb_message = KrbMessage::<ApReq>::decode_application_krb_message(data)
        .map_err(|err| NegotiationError::malformed(format!("invalid Kerberos GSS token: {err:?}")))?
        .0;

    let oid = krb_message.krb5_oid.0;
    if !is_kerberos_oid(&oid) {
        let mech: String = oid.into();

        return Err(NegotiationError::UnsupportedMechanism(mech));
    }

    if krb_message.krb5_token_id != AP_REQ_TOKEN_ID {
        return Err(NegotiationError::malformed(format!(
            "invalid kerberos token id: expected {:?} but got {:?}",
            AP_REQ_TOKEN_ID, krb_message.krb5_token_id
        )));
    }

    Ok((oid, krb_message.krb_msg))
}

/// Decrypts the [ApReq] ticket and returns decoded encrypted part of the ticket.
pub(super) fn decrypt_ap_req_ticket(key: &[u8], ap_req: &ApReq) -> Result<EncTicketPart, NegotiationError> {
    let ticket_enc_part = &ap_req.0.ticket.0 .0.enc_part.0;
    let cipher = CipherSuite::try_from(ticket_enc_part.etype.0 .0.as_slice())
        .map_err(|_| NegotiationError::UnsupportedMechanism("ticket encryption type".to_owned()))?
        .cipher();

    let encoded_enc_part = cipher
        .decrypt(key, TICKET_REP, &ticket_enc_part.cipher.0 .0)
        .map_err(|_| NegotiationError::malformed("KRB_AP_ERR_MODIFIED: ticket decryption failed"))?;

    Ok(picky_asn1_der::from_bytes(&encoded_enc_part)?)
}

/// Decrypts [ApReq] Authenticator and returns decoded authenticator.
pub(super) fn decrypt_ap_req_authenticator(
    session_key: &[u8],
    ap_req: &ApReq,
) -> Result<Authenticator, NegotiationError> {
    let encrypted_authenticator = &ap_req.0.authenticator.0;
    let cipher = CipherSuite::try_from(encrypted_authenticator.etype.0 .0.as_slice())
        .map_err(|_| NegotiationError::UnsupportedMechanism("authenticator encryption type".to_owned()))?
        .cipher();

    let encoded_authenticator = cipher
        .decrypt(session_key, AP_REQ_AUTHENTICATOR, &encrypted_authenticator.cipher.0 .0)
        .map_err(|_| NegotiationError::malformed("KRB_AP_ERR_MODIFIED: authenticator decryption failed"))?;

    Ok(picky_asn1_der::from_bytes(&encoded_authenticator)?)
}

/// Interprets a DER INTEGER payload as an unsigned number.
pub(super) fn integer_value(bytes: &[u8]) -> Option<u32> {
    let bytes = match bytes {
        [0, rest @ ..] if !rest.is_empty() => rest,
        bytes => bytes,
    };

    if bytes.is_empty() || bytes.len() > 4 {
        return None;
    }

    Some(bytes.iter().fold(0, |value, byte| (value << 8) | u32::from(*byte)))
}

/// Contents of the RFC 4121 authenticator checksum.
#[derive(Debug, PartialEq, Eq)]
pub(super) struct GssChecksum {
    pub flags: GssFlags,
    pub delegated: Option<DelegatedCredential>,
}

/// Parses the authenticator checksum.
///
/// [Authenticator Checksum](https://datatracker.ietf.org/doc/html/rfc4121#section-4.1.1):
/// ```not_rust
/// Octet        Name      Description
/// -----------------------------------------------------------------
/// 0..3         Lgth    Number of octets in Bnd field;  Represented
///                      in little-endian order;  Currently contains
///                      hex value 10 00 00 00 (16).
/// 4..19        Bnd     Channel binding information.
/// 20..23       Flags   Four-octet context-establishment flags in
///                      little-endian order.
/// 24..25       DlgOpt  The delegation option identifier (=1).
/// 26..27       Dlgth   The length of the Deleg field.
/// 28..(n-1)    Deleg   A KRB_CRED message (n = Dlgth + 28).
/// ```
///
/// Returns `None` for checksums of other types.
pub(super) fn parse_gss_checksum(checksum: &Checksum) -> Result<Option<GssChecksum>, NegotiationError> {
    if integer_value(&checksum.cksumtype.0 .0) != Some(GSS_CHECKSUM_TYPE) {
        return Ok(None);
    }

    let value = &checksum.checksum.0 .0;
    if value.len() < 24 {
        return Err(NegotiationError::malformed(format!(
            "invalid authenticator checksum length: expected >= 24 but got {}",
            value.len()
        )));
    }

    let flags = GssFlags::from_bits_truncate(LittleEndian::read_u32(&value[20..24]));

    let delegated = if flags.contains(GssFlags::GSS_C_DELEG_FLAG) && value.len() >= 28 {
        let len = usize::from(LittleEndian::read_u16(&value[26..28]));
        let krb_cred = value
            .get(28..28 + len)
            .ok_or_else(|| NegotiationError::malformed("delegated credential is truncated"))?;

        Some(DelegatedCredential::new(krb_cred.to_vec()))
    } else {
        None
    };

    Ok(Some(GssChecksum { flags, delegated }))
}
