//! Forges the Kerberos messages a browser would send after talking to a real KDC.

use oid::ObjectIdentifier;
use picky::oids;
use picky_asn1::bit_string::BitString;
use picky_asn1::date::GeneralizedTime;
use picky_asn1::restricted_string::IA5String;
use picky_asn1::wrapper::{
    Asn1SequenceOf, ExplicitContextTag0, ExplicitContextTag1, ExplicitContextTag2, ExplicitContextTag3,
    ExplicitContextTag4, ExplicitContextTag5, ExplicitContextTag6, ExplicitContextTag7, IntegerAsn1,
    ObjectIdentifierAsn1, OctetStringAsn1, Optional,
};
use picky_krb::constants::gss_api::{AP_REQ_TOKEN_ID, AUTHENTICATOR_CHECKSUM_TYPE};
use picky_krb::constants::key_usages::{AP_REQ_AUTHENTICATOR, INITIATOR_SIGN, TICKET_REP};
use picky_krb::constants::types::{AP_REQ_MSG_TYPE, NT_PRINCIPAL, NT_SRV_INST};
use picky_krb::crypto::aes::{checksum_sha_aes, AesSize};
use picky_krb::crypto::CipherSuite;
use picky_krb::data_types::{
    ApOptions, Authenticator, AuthenticatorInner, Checksum, EncTicketPart, EncTicketPartInner, EncryptedData,
    EncryptionKey, KerberosFlags, KerberosStringAsn1, KerberosTime, PrincipalName, Realm, Ticket, TicketInner,
    TransitedEncoding,
};
use picky_krb::gss_api::{
    ApplicationTag0, GssApiNegInit, KrbMessage, MechType, MechTypeList, MicToken, NegTokenInit, NegTokenTarg,
    NegTokenTarg1,
};
use picky_krb::messages::{ApReq, ApReqInner};
use time::{Duration, OffsetDateTime};

use kerberos_sso::credential::{Keytab, KeytabEntry};
use kerberos_sso::negotiation::flags::{ApOptions as ApOptionsFlags, GssFlags};
use kerberos_sso::{Secret, KERBEROS_VERSION};

pub const REALM: &str = "EXAMPLE.COM";
pub const SERVICE: [&str; 2] = ["HTTP", "www.example.com"];
pub const SERVICE_KVNO: u8 = 3;
pub const SERVICE_KEY: [u8; 32] = [
    168, 29, 77, 196, 211, 88, 148, 180, 123, 188, 196, 182, 173, 30, 249, 191, 89, 35, 44, 56, 20, 217, 132, 131, 89,
    144, 33, 79, 16, 91, 126, 72,
];
pub const SESSION_KEY: [u8; 32] = [
    199, 133, 201, 239, 57, 139, 61, 128, 71, 236, 217, 130, 250, 148, 117, 193, 197, 86, 155, 11, 92, 124, 232, 146, 3,
    14, 158, 220, 113, 63, 110, 230,
];

pub fn service_keytab() -> Vec<u8> {
    Keytab {
        entries: vec![KeytabEntry {
            realm: REALM.to_owned(),
            components: SERVICE.iter().map(|c| (*c).to_owned()).collect(),
            name_type: 1,
            timestamp: 0,
            kvno: u32::from(SERVICE_KVNO),
            key_type: 18,
            key: Secret::new(SERVICE_KEY.to_vec()),
        }],
    }
    .encode()
    .unwrap()
}

fn kerberos_string(value: &str) -> KerberosStringAsn1 {
    KerberosStringAsn1::from(IA5String::from_string(value.to_owned()).unwrap())
}

pub fn realm(name: &str) -> Realm {
    Realm::from(IA5String::from_string(name.to_owned()).unwrap())
}

pub fn principal_name(name_type: u8, components: &[&str]) -> PrincipalName {
    PrincipalName {
        name_type: ExplicitContextTag0::from(IntegerAsn1::from(vec![name_type])),
        name_string: ExplicitContextTag1::from(Asn1SequenceOf::from(
            components.iter().map(|c| kerberos_string(c)).collect::<Vec<_>>(),
        )),
    }
}

fn kerberos_time(time: OffsetDateTime) -> KerberosTime {
    KerberosTime::from(GeneralizedTime::from(time))
}

/// A client that obtained a service ticket for `HTTP/www.example.com`.
pub struct Client {
    pub name: String,
    pub crealm: String,
    pub auth_time: OffsetDateTime,
    pub end_time: OffsetDateTime,
    /// Realm written into the clear part of the ticket.
    pub ticket_realm: String,
    pub sname: Vec<String>,
    pub kvno: Option<u8>,
}

impl Client {
    pub fn new(name: &str) -> Self {
        let now = OffsetDateTime::now_utc();

        Self {
            name: name.to_owned(),
            crealm: REALM.to_owned(),
            auth_time: now - Duration::minutes(1),
            end_time: now + Duration::hours(10),
            ticket_realm: REALM.to_owned(),
            sname: SERVICE.iter().map(|c| (*c).to_owned()).collect(),
            kvno: Some(SERVICE_KVNO),
        }
    }

    pub fn with_realm(mut self, crealm: &str) -> Self {
        self.crealm = crealm.to_owned();
        self
    }

    fn cname(&self) -> PrincipalName {
        principal_name(NT_PRINCIPAL, &[self.name.as_str()])
    }

    /// Mirrors what the KDC does in the TGS exchange.
    pub fn make_ticket(&self) -> Ticket {
        let ticket_enc_part = EncTicketPart::from(EncTicketPartInner {
            flags: ExplicitContextTag0::from(KerberosFlags::from(BitString::with_bytes(vec![0x40, 0x81, 0x00, 0x00]))),
            key: ExplicitContextTag1::from(EncryptionKey {
                key_type: ExplicitContextTag0::from(IntegerAsn1::from(vec![u8::from(
                    CipherSuite::Aes256CtsHmacSha196,
                )])),
                key_value: ExplicitContextTag1::from(OctetStringAsn1::from(SESSION_KEY.to_vec())),
            }),
            crealm: ExplicitContextTag2::from(realm(&self.crealm)),
            cname: ExplicitContextTag3::from(self.cname()),
            transited: ExplicitContextTag4::from(TransitedEncoding {
                tr_type: ExplicitContextTag0::from(IntegerAsn1::from(vec![0])),
                contents: ExplicitContextTag1::from(OctetStringAsn1::from(vec![1])),
            }),
            auth_time: ExplicitContextTag5::from(kerberos_time(self.auth_time)),
            starttime: Optional::from(Some(ExplicitContextTag6::from(kerberos_time(self.auth_time)))),
            endtime: ExplicitContextTag7::from(kerberos_time(self.end_time)),
            renew_till: Optional::from(None),
            caddr: Optional::from(None),
            authorization_data: Optional::from(None),
        });

        let ticket_enc_data = CipherSuite::Aes256CtsHmacSha196
            .cipher()
            .encrypt(&SERVICE_KEY, TICKET_REP, &picky_asn1_der::to_vec(&ticket_enc_part).unwrap())
            .unwrap();

        let sname: Vec<&str> = self.sname.iter().map(String::as_str).collect();

        Ticket::from(TicketInner {
            tkt_vno: ExplicitContextTag0::from(IntegerAsn1::from(vec![KERBEROS_VERSION])),
            realm: ExplicitContextTag1::from(realm(&self.ticket_realm)),
            sname: ExplicitContextTag2::from(principal_name(NT_SRV_INST, &sname)),
            enc_part: ExplicitContextTag3::from(EncryptedData {
                etype: ExplicitContextTag0::from(IntegerAsn1::from(vec![u8::from(CipherSuite::Aes256CtsHmacSha196)])),
                kvno: Optional::from(
                    self.kvno
                        .map(|kvno| ExplicitContextTag1::from(IntegerAsn1::from(vec![kvno]))),
                ),
                cipher: ExplicitContextTag2::from(OctetStringAsn1::from(ticket_enc_data)),
            }),
        })
    }

    pub fn ap_req(&self, options: ApReqOptions) -> ApReq {
        let ApReqOptions {
            ctime,
            cusec,
            mutual,
            gss_flags,
            subkey,
        } = options;

        let cksum = gss_flags.map(|flags| {
            let mut value = vec![0x10, 0, 0, 0];
            value.extend_from_slice(&[0; 16]);
            value.extend_from_slice(&flags.bits().to_le_bytes());

            ExplicitContextTag3::from(Checksum {
                cksumtype: ExplicitContextTag0::from(IntegerAsn1::from(AUTHENTICATOR_CHECKSUM_TYPE.to_vec())),
                checksum: ExplicitContextTag1::from(OctetStringAsn1::from(value)),
            })
        });

        let authenticator = Authenticator::from(AuthenticatorInner {
            authenticator_vno: ExplicitContextTag0::from(IntegerAsn1::from(vec![KERBEROS_VERSION])),
            crealm: ExplicitContextTag1::from(realm(&self.crealm)),
            cname: ExplicitContextTag2::from(self.cname()),
            cksum: Optional::from(cksum),
            cusec: ExplicitContextTag4::from(IntegerAsn1::from_bytes_be_unsigned(cusec.to_be_bytes().to_vec())),
            ctime: ExplicitContextTag5::from(kerberos_time(ctime)),
            subkey: Optional::from(subkey.map(|key| {
                ExplicitContextTag6::from(EncryptionKey {
                    key_type: ExplicitContextTag0::from(IntegerAsn1::from(vec![u8::from(
                        CipherSuite::Aes256CtsHmacSha196,
                    )])),
                    key_value: ExplicitContextTag1::from(OctetStringAsn1::from(key)),
                })
            })),
            seq_number: Optional::from(None),
            authorization_data: Optional::from(None),
        });

        let encrypted_authenticator = CipherSuite::Aes256CtsHmacSha196
            .cipher()
            .encrypt(
                &SESSION_KEY,
                AP_REQ_AUTHENTICATOR,
                &picky_asn1_der::to_vec(&authenticator).unwrap(),
            )
            .unwrap();

        let ap_options = if mutual {
            ApOptionsFlags::MUTUAL_REQUIRED
        } else {
            ApOptionsFlags::empty()
        };

        ApReq::from(ApReqInner {
            pvno: ExplicitContextTag0::from(IntegerAsn1::from(vec![KERBEROS_VERSION])),
            msg_type: ExplicitContextTag1::from(IntegerAsn1::from(vec![AP_REQ_MSG_TYPE])),
            ap_options: ExplicitContextTag2::from(ApOptions::from(BitString::with_bytes(
                ap_options.bits().to_be_bytes().to_vec(),
            ))),
            ticket: ExplicitContextTag3::from(self.make_ticket()),
            authenticator: ExplicitContextTag4::from(EncryptedData {
                etype: ExplicitContextTag0::from(IntegerAsn1::from(vec![u8::from(CipherSuite::Aes256CtsHmacSha196)])),
                kvno: Optional::from(None),
                cipher: ExplicitContextTag2::from(OctetStringAsn1::from(encrypted_authenticator)),
            }),
        })
    }
}

pub struct ApReqOptions {
    pub ctime: OffsetDateTime,
    pub cusec: u32,
    pub mutual: bool,
    pub gss_flags: Option<GssFlags>,
    pub subkey: Option<Vec<u8>>,
}

impl Default for ApReqOptions {
    fn default() -> Self {
        let now = OffsetDateTime::now_utc();

        Self {
            ctime: now,
            cusec: now.microsecond(),
            mutual: false,
            gss_flags: None,
            subkey: None,
        }
    }
}

/// Kerberos GSS-API token (`[APPLICATION 0]` with the krb5 OID).
pub fn krb_token(ap_req: ApReq) -> Vec<u8> {
    picky_asn1_der::to_vec(&ApplicationTag0(KrbMessage {
        krb5_oid: ObjectIdentifierAsn1::from(oids::krb5()),
        krb5_token_id: AP_REQ_TOKEN_ID,
        krb_msg: ap_req,
    }))
    .unwrap()
}

pub fn mech_type_list(mech_types: &[ObjectIdentifier]) -> MechTypeList {
    MechTypeList::from(
        mech_types
            .iter()
            .cloned()
            .map(MechType::from)
            .collect::<Vec<_>>(),
    )
}

/// SPNEGO `NegTokenInit`, optionally with an optimistic mech token.
pub fn neg_token_init(mech_types: &[ObjectIdentifier], mech_token: Option<Vec<u8>>) -> Vec<u8> {
    picky_asn1_der::to_vec(&ApplicationTag0(GssApiNegInit {
        oid: ObjectIdentifierAsn1::from(oids::spnego()),
        neg_token_init: ExplicitContextTag0::from(NegTokenInit {
            mech_types: Optional::from(Some(ExplicitContextTag0::from(mech_type_list(mech_types)))),
            req_flags: Optional::from(None),
            mech_token: Optional::from(mech_token.map(|token| ExplicitContextTag2::from(OctetStringAsn1::from(token)))),
            mech_list_mic: Optional::from(None),
        }),
    }))
    .unwrap()
}

/// SPNEGO `NegTokenResp` sent by the client.
pub fn neg_token_resp(response_token: Option<Vec<u8>>, mech_list_mic: Option<Vec<u8>>) -> Vec<u8> {
    picky_asn1_der::to_vec(&NegTokenTarg1::from(NegTokenTarg {
        neg_result: Optional::from(None),
        supported_mech: Optional::from(None),
        response_token: Optional::from(
            response_token.map(|token| ExplicitContextTag2::from(OctetStringAsn1::from(token))),
        ),
        mech_list_mic: Optional::from(mech_list_mic.map(|mic| ExplicitContextTag3::from(OctetStringAsn1::from(mic)))),
    }))
    .unwrap()
}

/// Initiator `mechListMIC` over the offered mech types.
pub fn client_mic(key: &[u8], mech_types: &[ObjectIdentifier], seq_number: u64) -> Vec<u8> {
    let mut payload = picky_asn1_der::to_vec(&mech_type_list(mech_types)).unwrap();

    let mut mic_token = MicToken::with_initiator_flags().with_seq_number(seq_number);
    payload.extend_from_slice(&mic_token.header());
    mic_token.set_checksum(checksum_sha_aes(key, INITIATOR_SIGN, &payload, &AesSize::Aes256).unwrap());

    let mut raw = Vec::new();
    mic_token.encode(&mut raw).unwrap();

    raw
}
