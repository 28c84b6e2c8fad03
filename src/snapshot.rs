//! Snapshot blob production and consumption.
//!
//! The snapshot is the opaque payload shipped during a PSYNC full-resync
//! and read back from disk at startup. [`dump`] writes a minimal
//! well-formed blob; [`SnapshotReader`] walks a blob and yields string
//! records with their expiry. Sections the reader does not need (auxiliary
//! metadata, database selectors, hash-table sizing) are decoded and
//! discarded; anything malformed aborts the walk.

use jiff::Timestamp;
use thiserror::Error;

const MAGIC: &[u8] = b"REDIS";
const VERSION: &[u8] = b"0011";

const AUX_OPCODE: u8 = 0xFA;
const RESIZE_DB_OPCODE: u8 = 0xFB;
const EXPIRE_MS_OPCODE: u8 = 0xFC;
const EXPIRE_SECONDS_OPCODE: u8 = 0xFD;
const SELECT_DB_OPCODE: u8 = 0xFE;
const END_OF_FILE_OPCODE: u8 = 0xFF;
const STRING_VALUE_TYPE: u8 = 0x00;

const ENC_INT8: u32 = 0;
const ENC_INT16: u32 = 1;
const ENC_INT32: u32 = 2;
const ENC_COMPRESSED: u32 = 3;

#[derive(Error, Debug, PartialEq)]
pub enum SnapshotError {
    #[error("snapshot is truncated")]
    Truncated,
    #[error("bad magic header")]
    BadMagic,
    #[error("unknown opcode: {0:#04x}")]
    UnknownOpcode(u8),
    #[error("unknown value type: {0:#04x}")]
    UnknownValueType(u8),
    #[error("compressed strings are not supported")]
    UnsupportedEncoding,
    #[error("invalid expiry timestamp")]
    InvalidExpiry,
}

/// One record decoded from a snapshot. `expires_at_unix_ms == 0` means no
/// TTL.
#[derive(Debug, PartialEq)]
pub struct SnapshotEntry {
    pub key: String,
    pub value: String,
    pub expires_at_unix_ms: i64,
}

/// Produces a minimal well-formed snapshot of an empty keyspace: magic and
/// version, the end-of-file opcode, and a zeroed (disabled) checksum.
pub fn dump() -> Vec<u8> {
    let mut blob = Vec::with_capacity(MAGIC.len() + VERSION.len() + 9);
    blob.extend_from_slice(MAGIC);
    blob.extend_from_slice(VERSION);
    blob.push(END_OF_FILE_OPCODE);
    blob.extend_from_slice(&[0u8; 8]);
    blob
}

/// Cursor-driven reader over a snapshot blob.
pub struct SnapshotReader {
    buffer: Vec<u8>,
    cursor: usize,
    header_read: bool,
    finished: bool,
    pending_expiry_ms: i64,
}

impl SnapshotReader {
    pub fn new(buffer: Vec<u8>) -> Self {
        SnapshotReader {
            buffer,
            cursor: 0,
            header_read: false,
            finished: false,
            pending_expiry_ms: 0,
        }
    }

    /// Decodes up to the next record.
    ///
    /// Returns `Ok(None)` once the end-of-file opcode is reached. Errors
    /// leave the reader unusable; records returned before the error remain
    /// valid.
    pub fn next_entry(&mut self) -> Result<Option<SnapshotEntry>, SnapshotError> {
        if !self.header_read {
            self.read_header()?;
            self.header_read = true;
        }

        while !self.finished {
            let opcode = self.read_byte()?;

            match opcode {
                AUX_OPCODE => {
                    self.read_string()?;
                    self.read_string()?;
                }
                SELECT_DB_OPCODE => {
                    self.read_length()?;
                }
                RESIZE_DB_OPCODE => {
                    self.read_length()?;
                    self.read_length()?;
                }
                EXPIRE_SECONDS_OPCODE => {
                    let seconds = u32::from_le_bytes(self.read_array::<4>()?) as i64;
                    self.pending_expiry_ms = Timestamp::from_second(seconds)
                        .map_err(|_| SnapshotError::InvalidExpiry)?
                        .as_millisecond();
                }
                EXPIRE_MS_OPCODE => {
                    let millis = u64::from_le_bytes(self.read_array::<8>()?) as i64;
                    self.pending_expiry_ms = Timestamp::from_millisecond(millis)
                        .map_err(|_| SnapshotError::InvalidExpiry)?
                        .as_millisecond();
                }
                END_OF_FILE_OPCODE => {
                    self.finished = true;
                }
                value_type => {
                    let entry = self.read_record(value_type)?;
                    return Ok(Some(entry));
                }
            }
        }

        Ok(None)
    }

    fn read_header(&mut self) -> Result<(), SnapshotError> {
        let magic = self.read_slice(MAGIC.len())?;

        if magic != MAGIC {
            return Err(SnapshotError::BadMagic);
        }

        // Four ASCII version digits follow the magic.
        self.read_slice(VERSION.len())?;

        Ok(())
    }

    fn read_record(&mut self, value_type: u8) -> Result<SnapshotEntry, SnapshotError> {
        if value_type != STRING_VALUE_TYPE {
            return Err(SnapshotError::UnknownValueType(value_type));
        }

        let key = self.read_string()?;
        let value = self.read_string()?;
        let expires_at_unix_ms = std::mem::take(&mut self.pending_expiry_ms);

        Ok(SnapshotEntry {
            key,
            value,
            expires_at_unix_ms,
        })
    }

    fn read_byte(&mut self) -> Result<u8, SnapshotError> {
        let byte = *self.buffer.get(self.cursor).ok_or(SnapshotError::Truncated)?;
        self.cursor += 1;
        Ok(byte)
    }

    fn read_slice(&mut self, length: usize) -> Result<&[u8], SnapshotError> {
        let end = self.cursor + length;

        if end > self.buffer.len() {
            return Err(SnapshotError::Truncated);
        }

        let slice = &self.buffer[self.cursor..end];
        self.cursor = end;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], SnapshotError> {
        let slice = self.read_slice(N)?;
        Ok(slice.try_into().expect("slice length checked"))
    }

    /// Length-encoded integer: the top two bits of the first byte select a
    /// 6-bit, 14-bit, or 32-bit form. The special form (top bits `11`)
    /// marks an integer-encoded string and is reported via the flag.
    fn read_length_with_encoding(&mut self) -> Result<(u32, bool), SnapshotError> {
        let first = self.read_byte()?;

        match (first & 0xC0) >> 6 {
            0 => Ok(((first & 0x3F) as u32, false)),
            1 => {
                let second = self.read_byte()?;
                Ok((((first as u32 & 0x3F) << 8) | second as u32, false))
            }
            2 => {
                let length = u32::from_be_bytes(self.read_array::<4>()?);
                Ok((length, false))
            }
            _ => Ok(((first & 0x3F) as u32, true)),
        }
    }

    fn read_length(&mut self) -> Result<u32, SnapshotError> {
        let (length, _) = self.read_length_with_encoding()?;
        Ok(length)
    }

    fn read_string(&mut self) -> Result<String, SnapshotError> {
        let (length, is_encoded) = self.read_length_with_encoding()?;

        if is_encoded {
            return self.read_encoded_integer(length);
        }

        let bytes = self.read_slice(length as usize)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    fn read_encoded_integer(&mut self, encoding: u32) -> Result<String, SnapshotError> {
        match encoding {
            ENC_INT8 => Ok((self.read_byte()? as i8).to_string()),
            ENC_INT16 => Ok(i16::from_le_bytes(self.read_array::<2>()?).to_string()),
            ENC_INT32 => Ok(i32::from_le_bytes(self.read_array::<4>()?).to_string()),
            ENC_COMPRESSED => Err(SnapshotError::UnsupportedEncoding),
            _ => Err(SnapshotError::UnsupportedEncoding),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_string(blob: &mut Vec<u8>, s: &str) {
        blob.push(s.len() as u8);
        blob.extend_from_slice(s.as_bytes());
    }

    #[test]
    fn test_dump_is_readable_and_empty() {
        let mut reader = SnapshotReader::new(dump());
        assert_eq!(reader.next_entry(), Ok(None));
        // Reading past the end stays at the end.
        assert_eq!(reader.next_entry(), Ok(None));
    }

    #[test]
    fn test_plain_records() {
        let mut blob = Vec::new();
        blob.extend_from_slice(b"REDIS0011");
        blob.push(STRING_VALUE_TYPE);
        push_string(&mut blob, "foo");
        push_string(&mut blob, "bar");
        blob.push(STRING_VALUE_TYPE);
        push_string(&mut blob, "baz");
        push_string(&mut blob, "qux");
        blob.push(END_OF_FILE_OPCODE);

        let mut reader = SnapshotReader::new(blob);

        assert_eq!(
            reader.next_entry(),
            Ok(Some(SnapshotEntry {
                key: "foo".to_string(),
                value: "bar".to_string(),
                expires_at_unix_ms: 0,
            }))
        );
        assert_eq!(
            reader.next_entry(),
            Ok(Some(SnapshotEntry {
                key: "baz".to_string(),
                value: "qux".to_string(),
                expires_at_unix_ms: 0,
            }))
        );
        assert_eq!(reader.next_entry(), Ok(None));
    }

    #[test]
    fn test_expiry_markers() {
        let mut blob = Vec::new();
        blob.extend_from_slice(b"REDIS0011");

        blob.push(EXPIRE_SECONDS_OPCODE);
        blob.extend_from_slice(&1_714_000_000u32.to_le_bytes());
        blob.push(STRING_VALUE_TYPE);
        push_string(&mut blob, "sec");
        push_string(&mut blob, "a");

        blob.push(EXPIRE_MS_OPCODE);
        blob.extend_from_slice(&1_714_000_000_123u64.to_le_bytes());
        blob.push(STRING_VALUE_TYPE);
        push_string(&mut blob, "ms");
        push_string(&mut blob, "b");

        // The marker applies only to the record that follows it.
        blob.push(STRING_VALUE_TYPE);
        push_string(&mut blob, "plain");
        push_string(&mut blob, "c");

        blob.push(END_OF_FILE_OPCODE);

        let mut reader = SnapshotReader::new(blob);

        let first = reader.next_entry().unwrap().unwrap();
        assert_eq!(first.key, "sec");
        assert_eq!(first.expires_at_unix_ms, 1_714_000_000_000);

        let second = reader.next_entry().unwrap().unwrap();
        assert_eq!(second.key, "ms");
        assert_eq!(second.expires_at_unix_ms, 1_714_000_000_123);

        let third = reader.next_entry().unwrap().unwrap();
        assert_eq!(third.key, "plain");
        assert_eq!(third.expires_at_unix_ms, 0);
    }

    #[test]
    fn test_skipped_sections() {
        let mut blob = Vec::new();
        blob.extend_from_slice(b"REDIS0011");

        blob.push(AUX_OPCODE);
        push_string(&mut blob, "redis-ver");
        push_string(&mut blob, "7.2.0");

        blob.push(SELECT_DB_OPCODE);
        blob.push(0);

        blob.push(RESIZE_DB_OPCODE);
        blob.push(1);
        blob.push(0);

        blob.push(STRING_VALUE_TYPE);
        push_string(&mut blob, "k");
        push_string(&mut blob, "v");

        blob.push(END_OF_FILE_OPCODE);

        let mut reader = SnapshotReader::new(blob);
        let entry = reader.next_entry().unwrap().unwrap();
        assert_eq!(entry.key, "k");
        assert_eq!(entry.value, "v");
        assert_eq!(reader.next_entry(), Ok(None));
    }

    #[test]
    fn test_integer_encoded_values() {
        let mut blob = Vec::new();
        blob.extend_from_slice(b"REDIS0011");

        blob.push(STRING_VALUE_TYPE);
        push_string(&mut blob, "count8");
        blob.push(0xC0);
        blob.push(42);

        blob.push(STRING_VALUE_TYPE);
        push_string(&mut blob, "count16");
        blob.push(0xC1);
        blob.extend_from_slice(&1000i16.to_le_bytes());

        blob.push(STRING_VALUE_TYPE);
        push_string(&mut blob, "count32");
        blob.push(0xC2);
        blob.extend_from_slice(&123456i32.to_le_bytes());

        blob.push(END_OF_FILE_OPCODE);

        let mut reader = SnapshotReader::new(blob);
        assert_eq!(reader.next_entry().unwrap().unwrap().value, "42");
        assert_eq!(reader.next_entry().unwrap().unwrap().value, "1000");
        assert_eq!(reader.next_entry().unwrap().unwrap().value, "123456");
    }

    #[test]
    fn test_malformed_blobs() {
        let mut compressed = Vec::new();
        compressed.extend_from_slice(b"REDIS0011");
        compressed.push(STRING_VALUE_TYPE);
        compressed.push(0xC3);

        let test_cases: Vec<(Vec<u8>, SnapshotError)> = vec![
            (b"NOTRD0011".to_vec(), SnapshotError::BadMagic),
            (b"RED".to_vec(), SnapshotError::Truncated),
            (b"REDIS0011".to_vec(), SnapshotError::Truncated),
            (
                {
                    let mut blob = b"REDIS0011".to_vec();
                    blob.push(0x42);
                    blob
                },
                SnapshotError::UnknownValueType(0x42),
            ),
            (compressed, SnapshotError::UnsupportedEncoding),
        ];

        for (blob, expected) in test_cases {
            let mut reader = SnapshotReader::new(blob);
            let mut result = reader.next_entry();

            while let Ok(Some(_)) = result {
                result = reader.next_entry();
            }

            assert_eq!(result, Err(expected));
        }
    }

    #[test]
    fn test_entries_before_an_error_are_preserved() {
        let mut blob = Vec::new();
        blob.extend_from_slice(b"REDIS0011");
        blob.push(STRING_VALUE_TYPE);
        push_string(&mut blob, "good");
        push_string(&mut blob, "entry");
        blob.push(0x42);

        let mut reader = SnapshotReader::new(blob);
        assert_eq!(reader.next_entry().unwrap().unwrap().key, "good");
        assert_eq!(
            reader.next_entry(),
            Err(SnapshotError::UnknownValueType(0x42))
        );
    }
}
