//! RESP protocol codec.
//!
//! Frames typed values to and from byte streams. The decoder is
//! incremental: it consumes from the front of a buffer and reports either a
//! complete value together with the number of bytes it occupied on the
//! wire, or [`RespError::Incomplete`] when the buffer ends mid-frame. The
//! byte count feeds replication offset accounting, so it always covers the
//! full tag + payload + terminator span.
//!
//! Two encode-only variants realize framing tricks used by replication:
//! [`RespValue::FlatArray`] concatenates member encodings without an array
//! header (the PSYNC reply), and [`RespValue::BulkBytes`] emits a bulk
//! length header followed by raw bytes with no trailing CRLF (the snapshot
//! payload shipped inline after FULLRESYNC).

use thiserror::Error;

/// Errors produced while decoding a frame.
#[derive(Error, Debug, PartialEq)]
pub enum RespError {
    /// The buffer ends before the frame does; read more bytes and retry.
    #[error("incomplete frame")]
    Incomplete,
    #[error("invalid type tag: {0:#04x}")]
    InvalidType(u8),
    #[error("invalid length header")]
    InvalidLength,
    #[error("invalid bulk string")]
    InvalidBulk,
    #[error("invalid array")]
    InvalidArray,
    #[error("I/O error: {0}")]
    Io(String),
}

impl RespError {
    /// Encodes the error as a RESP simple error suitable for a client.
    pub fn as_string(&self) -> String {
        String::from_utf8_lossy(&RespValue::SimpleError(format!("ERR {}", self)).encode())
            .into_owned()
    }
}

/// One protocol value.
#[derive(Debug, PartialEq, Clone)]
pub enum RespValue {
    SimpleString(String),
    SimpleError(String),
    Integer(i64),
    BulkString(String),
    /// The `$-1\r\n` marker, distinct from an empty bulk string.
    NullBulkString,
    Array(Vec<RespValue>),
    /// Encode-only: members concatenated with no array header.
    FlatArray(Vec<RespValue>),
    /// Encode-only: length header plus raw payload, no trailing CRLF.
    BulkBytes(Vec<u8>),
    Null,
    Boolean(bool),
}

const CRLF: &[u8] = b"\r\n";

impl RespValue {
    /// Decodes a single frame from the front of `bytes`.
    ///
    /// Returns the value and the total number of bytes consumed.
    /// [`RespError::Incomplete`] means the caller should keep the buffer
    /// and retry once more bytes arrive; every other error means the
    /// leading bytes do not form a valid frame.
    pub fn decode(bytes: &[u8]) -> Result<(RespValue, usize), RespError> {
        let Some(&tag) = bytes.first() else {
            return Err(RespError::Incomplete);
        };

        match tag {
            b'+' => {
                let (line, consumed) = read_line(bytes, 1)?;
                Ok((RespValue::SimpleString(into_utf8(line)?), consumed))
            }
            b'-' => {
                let (line, consumed) = read_line(bytes, 1)?;
                Ok((RespValue::SimpleError(into_utf8(line)?), consumed))
            }
            b':' => {
                let (line, consumed) = read_line(bytes, 1)?;
                let number = into_utf8(line)?
                    .parse::<i64>()
                    .map_err(|_| RespError::InvalidLength)?;
                Ok((RespValue::Integer(number), consumed))
            }
            b'$' => decode_bulk_string(bytes),
            b'*' => decode_array(bytes),
            b'_' => {
                let (line, consumed) = read_line(bytes, 1)?;
                if !line.is_empty() {
                    return Err(RespError::InvalidType(tag));
                }
                Ok((RespValue::Null, consumed))
            }
            b'#' => {
                let (line, consumed) = read_line(bytes, 1)?;
                match line {
                    b"t" => Ok((RespValue::Boolean(true), consumed)),
                    b"f" => Ok((RespValue::Boolean(false), consumed)),
                    _ => Err(RespError::InvalidType(tag)),
                }
            }
            other => Err(RespError::InvalidType(other)),
        }
    }

    /// Encodes the value as a contiguous byte string.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            RespValue::SimpleString(s) => format!("+{}\r\n", s).into_bytes(),
            RespValue::SimpleError(s) => format!("-{}\r\n", s).into_bytes(),
            RespValue::Integer(i) => format!(":{}\r\n", i).into_bytes(),
            RespValue::BulkString(s) => format!("${}\r\n{}\r\n", s.len(), s).into_bytes(),
            RespValue::NullBulkString => b"$-1\r\n".to_vec(),
            RespValue::Array(values) => {
                let mut encoded = format!("*{}\r\n", values.len()).into_bytes();
                for value in values {
                    encoded.extend_from_slice(&value.encode());
                }
                encoded
            }
            RespValue::FlatArray(values) => {
                let mut encoded = Vec::new();
                for value in values {
                    encoded.extend_from_slice(&value.encode());
                }
                encoded
            }
            RespValue::BulkBytes(bytes) => {
                let mut encoded = format!("${}\r\n", bytes.len()).into_bytes();
                encoded.extend_from_slice(bytes);
                encoded
            }
            RespValue::Null => b"_\r\n".to_vec(),
            RespValue::Boolean(b) => {
                if *b {
                    b"#t\r\n".to_vec()
                } else {
                    b"#f\r\n".to_vec()
                }
            }
        }
    }

    /// The textual payload of string-like values.
    pub fn as_string(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(s)
            | RespValue::SimpleError(s)
            | RespValue::BulkString(s) => Some(s),
            _ => None,
        }
    }
}

/// Reads the CRLF-terminated line starting at `start`.
///
/// Returns the line without its terminator and the number of bytes
/// consumed from the beginning of the buffer.
fn read_line(bytes: &[u8], start: usize) -> Result<(&[u8], usize), RespError> {
    let haystack = bytes.get(start..).ok_or(RespError::Incomplete)?;

    let Some(pos) = haystack.windows(2).position(|window| window == CRLF) else {
        return Err(RespError::Incomplete);
    };

    Ok((&haystack[..pos], start + pos + 2))
}

fn into_utf8(line: &[u8]) -> Result<String, RespError> {
    std::str::from_utf8(line)
        .map(str::to_string)
        .map_err(|_| RespError::InvalidBulk)
}

fn decode_bulk_string(bytes: &[u8]) -> Result<(RespValue, usize), RespError> {
    let (header, header_consumed) = read_line(bytes, 1)?;

    let length = into_utf8(header)?
        .parse::<i64>()
        .map_err(|_| RespError::InvalidLength)?;

    if length < 0 {
        return Ok((RespValue::NullBulkString, header_consumed));
    }

    let length = length as usize;
    let end = header_consumed + length + CRLF.len();

    if bytes.len() < end {
        return Err(RespError::Incomplete);
    }

    if &bytes[header_consumed + length..end] != CRLF {
        return Err(RespError::InvalidBulk);
    }

    // An empty bulk string is indistinguishable from the null marker.
    if length == 0 {
        return Ok((RespValue::NullBulkString, end));
    }

    let content = into_utf8(&bytes[header_consumed..header_consumed + length])?;

    Ok((RespValue::BulkString(content), end))
}

fn decode_array(bytes: &[u8]) -> Result<(RespValue, usize), RespError> {
    let (header, mut consumed) = read_line(bytes, 1)?;

    let count = into_utf8(header)?
        .parse::<i64>()
        .map_err(|_| RespError::InvalidLength)?;

    if count < 0 {
        return Err(RespError::InvalidArray);
    }

    let mut values = Vec::with_capacity(count as usize);

    for _ in 0..count {
        let (value, child_consumed) = RespValue::decode(&bytes[consumed..])?;
        consumed += child_consumed;
        values.push(value);
    }

    Ok((RespValue::Array(values), consumed))
}
