use oid::ObjectIdentifier;
use picky_asn1::wrapper::{
    ExplicitContextTag0, ExplicitContextTag1, ExplicitContextTag2, ExplicitContextTag3, IntegerAsn1,
    ObjectIdentifierAsn1, OctetStringAsn1, Optional,
};
use picky_asn1_der::Asn1RawDer;
use picky_krb::constants::gss_api::AP_REP_TOKEN_ID;
use picky_krb::constants::key_usages::{ACCEPTOR_SIGN, AP_REP_ENC, INITIATOR_SIGN};
use picky_krb::constants::types::AP_REP_MSG_TYPE;
use picky_krb::crypto::aes::{checksum_sha_aes, AesSize};
use picky_krb::crypto::CipherSuite;
use picky_krb::data_types::{EncApRepPart, EncApRepPartInner, EncryptedData, KerberosTime, Microseconds};
use picky_krb::gss_api::{ApplicationTag0, KrbMessage, MechType, MicToken, NegTokenTarg, NegTokenTarg1};
use picky_krb::messages::{ApRep, ApRepInner};

use crate::error::NegotiationError;
use crate::KERBEROS_VERSION;

pub(super) fn generate_neg_token_targ(
    neg_result: &[u8],
    supported_mech: Option<ObjectIdentifier>,
    response_token: Option<Vec<u8>>,
    mech_list_mic: Option<Vec<u8>>,
) -> Result<Vec<u8>, NegotiationError> {
    let neg_token_targ = NegTokenTarg1::from(NegTokenTarg {
        neg_result: Optional::from(Some(ExplicitContextTag0::from(Asn1RawDer(neg_result.to_vec())))),
        supported_mech: Optional::from(supported_mech.map(|mech| ExplicitContextTag1::from(MechType::from(mech)))),
        response_token: Optional::from(
            response_token.map(|token| ExplicitContextTag2::from(OctetStringAsn1::from(token))),
        ),
        mech_list_mic: Optional::from(mech_list_mic.map(|mic| ExplicitContextTag3::from(OctetStringAsn1::from(mic)))),
    });

    Ok(picky_asn1_der::to_vec(&neg_token_targ)?)
}

/// Builds the KRB_AP_REP for mutual authentication.
///
/// [Generation of a KRB_AP_REP Message](https://www.rfc-editor.org/rfc/rfc4120#section-3.2.4):
/// > the server constructs an AP_REP message that includes the timestamp and microsecond field
/// > obtained from the client's authenticator. The message is encrypted in the session key.
pub(super) fn generate_ap_rep(
    session_key: &[u8],
    etype: u8,
    ctime: KerberosTime,
    cusec: Microseconds,
    seq_number: u32,
) -> Result<ApRep, NegotiationError> {
    let enc_part = EncApRepPart::from(EncApRepPartInner {
        ctime: ExplicitContextTag0::from(ctime),
        cusec: ExplicitContextTag1::from(cusec),
        subkey: Optional::from(None),
        seq_number: Optional::from(Some(ExplicitContextTag3::from(IntegerAsn1::from_bytes_be_unsigned(
            seq_number.to_be_bytes().to_vec(),
        )))),
    });

    let cipher = CipherSuite::try_from([etype].as_slice())
        .map_err(|_| NegotiationError::UnsupportedMechanism(format!("encryption type {etype}")))?
        .cipher();
    let enc_data = cipher.encrypt(session_key, AP_REP_ENC, &picky_asn1_der::to_vec(&enc_part)?)?;

    Ok(ApRep::from(ApRepInner {
        pvno: ExplicitContextTag0::from(IntegerAsn1::from(vec![KERBEROS_VERSION])),
        msg_type: ExplicitContextTag1::from(IntegerAsn1::from(vec![AP_REP_MSG_TYPE])),
        enc_part: ExplicitContextTag2::from(EncryptedData {
            etype: ExplicitContextTag0::from(IntegerAsn1::from(vec![etype])),
            kvno: Optional::from(None),
            cipher: ExplicitContextTag2::from(OctetStringAsn1::from(enc_data)),
        }),
    }))
}

/// Wraps the AP-REP into a Kerberos GSS token.
pub(super) fn generate_krb_message(mech_id: ObjectIdentifier, ap_rep: ApRep) -> Result<Vec<u8>, NegotiationError> {
    let krb_blob = ApplicationTag0(KrbMessage {
        krb5_oid: ObjectIdentifierAsn1::from(mech_id),
        krb5_token_id: AP_REP_TOKEN_ID,
        krb_msg: ap_rep,
    });

    Ok(picky_asn1_der::to_vec(&krb_blob)?)
}

pub(super) fn aes_size(etype: u8) -> AesSize {
    match CipherSuite::try_from([etype].as_slice()) {
        Ok(CipherSuite::Aes128CtsHmacSha196) => AesSize::Aes128,
        _ => AesSize::Aes256,
    }
}

/// Checks the `mechListMIC` sent by the initiator.
///
/// [Flags Field](https://datatracker.ietf.org/doc/html/rfc4121#section-4.2.2): the
/// `SentByAcceptor` bit must be clear and `Sealed` must never be set in MIC tokens.
pub(super) fn validate_mic_token(
    raw_token: &[u8],
    mech_types: &[u8],
    key: &[u8],
    aes_size: &AesSize,
) -> Result<(), NegotiationError> {
    let token = MicToken::decode(raw_token)
        .map_err(|err| NegotiationError::malformed(format!("invalid MIC token: {err:?}")))?;

    if token.flags & 0b01 != 0 {
        return Err(NegotiationError::malformed("invalid MIC token SentByAcceptor flag"));
    }
    if token.flags & 0b10 == 0b10 {
        return Err(NegotiationError::malformed(
            "the Sealed flag has not to be set in the MIC token",
        ));
    }

    let payload = [mech_types, token.header().as_slice()].concat();
    let checksum = checksum_sha_aes(key, INITIATOR_SIGN, &payload, aes_size)?;

    if checksum != token.checksum {
        return Err(NegotiationError::malformed("bad checksum of the mic token"));
    }

    Ok(())
}

pub(super) fn generate_mic_token(
    seq_number: u64,
    mut payload: Vec<u8>,
    key: &[u8],
    aes_size: &AesSize,
) -> Result<Vec<u8>, NegotiationError> {
    let mut mic_token = MicToken::with_acceptor_flags().with_seq_number(seq_number);

    payload.extend_from_slice(&mic_token.header());

    mic_token.set_checksum(checksum_sha_aes(key, ACCEPTOR_SIGN, &payload, aes_size)?);

    let mut mic_token_raw = Vec::new();
    mic_token
        .encode(&mut mic_token_raw)
        .map_err(|err| NegotiationError::malformed(format!("failed to encode MIC token: {err:?}")))?;

    Ok(mic_token_raw)
}
