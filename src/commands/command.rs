//! Command extraction from decoded protocol frames.

use crate::commands::CommandError;
use crate::resp::RespValue;

/// Verbs whose raw frames are fanned out to replicas.
const PROPAGATED_VERBS: [&str; 2] = ["SET", "DEL"];

/// A parsed client request: the uppercased verb, its arguments, and the
/// raw frame bytes captured at decode time (used verbatim for
/// propagation).
#[derive(Debug, PartialEq, Clone)]
pub struct Command {
    pub name: String,
    pub args: Vec<String>,
    pub raw: Vec<u8>,
    pub propagate: bool,
}

impl Command {
    /// Builds a command from a decoded frame.
    ///
    /// Requests are arrays of bulk strings; a lone string frame is
    /// accepted as a bare verb (inline PING during handshakes).
    pub fn from_frame(frame: &RespValue, raw: &[u8]) -> Result<Self, CommandError> {
        match frame {
            RespValue::Array(elements) => {
                let mut parts = Vec::with_capacity(elements.len());

                for element in elements {
                    let part = element.as_string().ok_or(CommandError::InvalidFrame)?;
                    parts.push(part.to_string());
                }

                let Some((name, args)) = parts.split_first() else {
                    return Err(CommandError::InvalidFrame);
                };

                Ok(Self::build(name, args.to_vec(), raw.to_vec()))
            }
            RespValue::SimpleString(s) | RespValue::BulkString(s) => {
                Ok(Self::build(s, Vec::new(), raw.to_vec()))
            }
            _ => Err(CommandError::InvalidFrame),
        }
    }

    /// Test/handshake helper: builds a command without a wire frame; the
    /// raw bytes are the canonical encoding of the parts.
    pub fn from_parts(name: &str, args: &[&str]) -> Self {
        let mut elements = vec![RespValue::BulkString(name.to_string())];
        elements.extend(args.iter().map(|arg| RespValue::BulkString(arg.to_string())));
        let raw = RespValue::Array(elements).encode();

        Self::build(name, args.iter().map(|s| s.to_string()).collect(), raw)
    }

    fn build(name: &str, args: Vec<String>, raw: Vec<u8>) -> Self {
        let name = name.to_uppercase();
        let propagate = PROPAGATED_VERBS.contains(&name.as_str());

        Command {
            name,
            args,
            raw,
            propagate,
        }
    }
}
