//! MIT keytab file format.
//!
//! [The keytab binary file format](https://web.mit.edu/kerberos/krb5-devel/doc/formats/keytab_file_format.html):
//! ```not_rust
//! keytab {
//!     uint16_t file_format_version;                    /* 0x502 */
//!     keytab_entry entries[*];
//! };
//!
//! keytab_entry {
//!     int32_t size;
//!     uint16_t num_components;    /* sub 1 if version 0x501 */
//!     counted_octet_string realm;
//!     counted_octet_string components[num_components];
//!     uint32_t name_type;   /* not present if version 0x501 */
//!     uint32_t timestamp;
//!     uint8_t vno8;
//!     keyblock key;
//!     uint32_t vno; /* only present if >= 4 bytes left in entry */
//! };
//! ```

use std::io::{Cursor, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::CredentialError;
use crate::Secret;

const KEYTAB_FIRST_BYTE: u8 = 0x05;
const KEYTAB_VERSION_2: u16 = 0x0502;

/// One key of a keytab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeytabEntry {
    pub realm: String,
    pub components: Vec<String>,
    pub name_type: u32,
    pub timestamp: u32,
    pub kvno: u32,
    pub key_type: u16,
    pub key: Secret<Vec<u8>>,
}

impl KeytabEntry {
    /// Principal name without the realm.
    pub fn principal_name(&self) -> String {
        self.components.join("/")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keytab {
    pub entries: Vec<KeytabEntry>,
}

impl Keytab {
    pub fn decode(data: &[u8]) -> Result<Self, CredentialError> {
        let mut reader = Cursor::new(data);

        let version = reader.read_u16::<BigEndian>().map_err(truncated)?;
        if version >> 8 != u16::from(KEYTAB_FIRST_BYTE) {
            return Err(CredentialError::MalformedKeytab(format!(
                "invalid keytab magic: {version:#06x}"
            )));
        }
        if version != KEYTAB_VERSION_2 {
            return Err(CredentialError::UnsupportedKeytabVersion(version));
        }

        let mut entries = Vec::new();

        while (reader.position() as usize) < data.len() {
            let size = reader.read_i32::<BigEndian>().map_err(truncated)?;
            let len = size.unsigned_abs() as usize;

            let start = reader.position() as usize;
            let record = data
                .get(start..start + len)
                .ok_or_else(|| CredentialError::MalformedKeytab(format!("entry of {len} bytes is truncated")))?;
            reader.set_position((start + len) as u64);

            if size <= 0 {
                // deleted entry
                continue;
            }

            entries.push(decode_entry(record)?);
        }

        Ok(Self { entries })
    }

    pub fn encode(&self) -> Result<Vec<u8>, CredentialError> {
        let mut data = Vec::new();
        data.write_u16::<BigEndian>(KEYTAB_VERSION_2).map_err(truncated)?;

        for entry in &self.entries {
            let record = encode_entry(entry)?;
            let size = i32::try_from(record.len())
                .map_err(|_| CredentialError::MalformedKeytab("keytab entry is too big".to_owned()))?;

            data.write_i32::<BigEndian>(size).map_err(truncated)?;
            data.write_all(&record).map_err(truncated)?;
        }

        Ok(data)
    }
}

fn truncated(err: std::io::Error) -> CredentialError {
    CredentialError::MalformedKeytab(format!("unexpected end of data: {err}"))
}

fn read_counted_bytes(reader: &mut impl Read) -> Result<Vec<u8>, CredentialError> {
    let len = reader.read_u16::<BigEndian>().map_err(truncated)?;
    let mut buf = vec![0; usize::from(len)];
    reader.read_exact(&mut buf).map_err(truncated)?;

    Ok(buf)
}

fn read_counted_string(reader: &mut impl Read) -> Result<String, CredentialError> {
    String::from_utf8(read_counted_bytes(reader)?)
        .map_err(|err| CredentialError::MalformedKeytab(format!("principal is not valid UTF-8: {err}")))
}

fn write_counted_bytes(writer: &mut impl Write, data: &[u8]) -> Result<(), CredentialError> {
    let len = u16::try_from(data.len())
        .map_err(|_| CredentialError::MalformedKeytab("counted string is too long".to_owned()))?;
    writer.write_u16::<BigEndian>(len).map_err(truncated)?;
    writer.write_all(data).map_err(truncated)?;

    Ok(())
}

fn decode_entry(record: &[u8]) -> Result<KeytabEntry, CredentialError> {
    let mut reader = Cursor::new(record);

    let num_components = reader.read_u16::<BigEndian>().map_err(truncated)?;
    let realm = read_counted_string(&mut reader)?;
    let components = (0..num_components)
        .map(|_| read_counted_string(&mut reader))
        .collect::<Result<Vec<_>, _>>()?;
    let name_type = reader.read_u32::<BigEndian>().map_err(truncated)?;
    let timestamp = reader.read_u32::<BigEndian>().map_err(truncated)?;
    let vno8 = reader.read_u8().map_err(truncated)?;
    let key_type = reader.read_u16::<BigEndian>().map_err(truncated)?;
    let key = Secret::new(read_counted_bytes(&mut reader)?);

    // The 32-bit kvno supersedes the 8-bit one when present and non-zero.
    let remaining = record.len() - reader.position() as usize;
    let kvno = if remaining >= 4 {
        match reader.read_u32::<BigEndian>().map_err(truncated)? {
            0 => u32::from(vno8),
            kvno => kvno,
        }
    } else {
        u32::from(vno8)
    };

    Ok(KeytabEntry {
        realm,
        components,
        name_type,
        timestamp,
        kvno,
        key_type,
        key,
    })
}

fn encode_entry(entry: &KeytabEntry) -> Result<Vec<u8>, CredentialError> {
    let mut record = Vec::new();

    let num_components = u16::try_from(entry.components.len())
        .map_err(|_| CredentialError::MalformedKeytab("too many principal components".to_owned()))?;
    record.write_u16::<BigEndian>(num_components).map_err(truncated)?;
    write_counted_bytes(&mut record, entry.realm.as_bytes())?;
    for component in &entry.components {
        write_counted_bytes(&mut record, component.as_bytes())?;
    }
    record.write_u32::<BigEndian>(entry.name_type).map_err(truncated)?;
    record.write_u32::<BigEndian>(entry.timestamp).map_err(truncated)?;
    record
        .write_u8(u8::try_from(entry.kvno).unwrap_or(0))
        .map_err(truncated)?;
    record.write_u16::<BigEndian>(entry.key_type).map_err(truncated)?;
    write_counted_bytes(&mut record, entry.key.as_ref())?;
    record.write_u32::<BigEndian>(entry.kvno).map_err(truncated)?;

    Ok(record)
}
