//! Command parsing, dispatch, and the per-verb handlers.

mod command;
mod command_docs;
mod config_get;
mod del;
mod echo;
mod error;
mod get;
mod incr;
mod info;
mod keys;
mod ping;
mod psync;
mod replconf;
mod router;
mod set;
mod stream_format;
mod transactions;
mod type_command;
mod wait;
mod xadd;
mod xrange;
mod xread;

pub use command::Command;
pub use error::CommandError;
pub use router::{dispatch, execute, DispatchOutcome, RequestContext};
