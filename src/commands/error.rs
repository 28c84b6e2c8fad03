//! Command-level failures and their wire encoding.
//!
//! These errors are sent to the client as RESP simple errors; they never
//! close the connection and are never propagated to replicas.

use thiserror::Error;

use crate::resp::RespValue;
use crate::store::StoreError;
use crate::transactions::TransactionError;

#[derive(Error, Debug, PartialEq)]
pub enum CommandError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("wrong number of arguments for '{0}' command")]
    WrongNumberOfArguments(String),
    #[error("expected an array of bulk strings")]
    InvalidFrame,
    #[error("syntax error")]
    SyntaxError,
    #[error("invalid expire time in 'set' command")]
    InvalidExpireTime,
    #[error("timeout is not an integer or out of range")]
    InvalidTimeout,
    #[error("invalid glob pattern: {0}")]
    InvalidGlobPattern(String),
    #[error("unsupported CONFIG parameter '{0}'")]
    UnknownConfigParameter(String),
    #[error("unsupported INFO section '{0}'")]
    UnknownInfoSection(String),
    #[error("EXEC without MULTI")]
    ExecWithoutMulti,
    #[error("DISCARD without MULTI")]
    DiscardWithoutMulti,
    #[error("PSYNC is only valid on a primary")]
    NotAPrimary,
    #[error("write commands are not allowed on a replica")]
    ReplicaReadOnly,
    #[error("invalid PSYNC arguments")]
    InvalidPsync,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

impl CommandError {
    /// The RESP value written back to the client.
    pub fn as_value(&self) -> RespValue {
        RespValue::SimpleError(format!("ERR {}", self))
    }
}
