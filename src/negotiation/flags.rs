use bitflags::bitflags;
use picky_asn1::bit_string::BitString;

bitflags! {
    /// This flags appears in the application request (KRB_AP_REQ) and
    /// affects the way the request is processed.
    ///
    /// [APOptions](https://www.rfc-editor.org/rfc/rfc4120#section-5.5.1)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ApOptions: u32 {
        const USE_SESSION_KEY = 0x40000000;
        const MUTUAL_REQUIRED = 0x20000000;
    }
}

impl From<&BitString> for ApOptions {
    fn from(bits: &BitString) -> Self {
        // The first byte of the raw bit string holds the number of unused bits.
        let mut raw = [0; 4];
        for (dst, src) in raw.iter_mut().zip(bits.as_bytes().iter().skip(1)) {
            *dst = *src;
        }

        ApOptions::from_bits_truncate(u32::from_be_bytes(raw))
    }
}

bitflags! {
    /// The checksum "Flags" field is used to convey service options or extension negotiation information.
    ///
    /// [Checksum Flags Field](https://datatracker.ietf.org/doc/html/rfc4121#section-4.1.1.1).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GssFlags: u32 {
        const GSS_C_DELEG_FLAG      = 1;
        const GSS_C_MUTUAL_FLAG     = 2;
        const GSS_C_REPLAY_FLAG     = 4;
        const GSS_C_SEQUENCE_FLAG   = 8;
        const GSS_C_CONF_FLAG       = 16;
        const GSS_C_INTEG_FLAG      = 32;
    }
}
