//! Server configuration assembled from command-line flags.
//!
//! The configuration is parsed once at startup and passed by value to the
//! components that need it. Presence of `--replicaof` selects the replica
//! role; everything else defaults to a standalone primary.

use regex::Regex;
use thiserror::Error;

/// Errors that can occur while parsing command-line flags.
#[derive(Error, Debug, PartialEq, Clone)]
pub enum CliError {
    #[error("invalid command line flag")]
    InvalidCommandLineFlag,
    #[error("invalid port flag value")]
    InvalidPortFlagValue,
    #[error("invalid primary address")]
    InvalidPrimaryAddress,
    #[error("invalid primary port")]
    InvalidPrimaryPort,
}

/// Immutable server configuration.
///
/// Recognized flags:
///
/// * `--dir <path>` - directory holding the snapshot file
/// * `--dbfilename <name>` - snapshot file name
/// * `--host <addr>` - listen address (default `0.0.0.0`)
/// * `--port <int>` - listen port (default `6379`)
/// * `--replicaof "<host> <port>"` - replicate from the given primary
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub dir: String,
    pub dbfilename: String,
    pub host: String,
    pub port: u16,
    /// `Some((host, port))` when this process runs as a replica.
    pub replicaof: Option<(String, u16)>,
}

impl Config {
    /// Parses the process arguments into a `Config`.
    ///
    /// The first argument (program name) is skipped. Unknown flags and
    /// flags missing their value are rejected.
    pub fn new<I: IntoIterator<Item = String>>(command_line_args: I) -> Result<Self, CliError> {
        let mut iter = command_line_args.into_iter().skip(1);

        let mut dir: Option<String> = None;
        let mut dbfilename: Option<String> = None;
        let mut host: Option<String> = None;
        let mut port: Option<u16> = None;
        let mut replicaof: Option<(String, u16)> = None;

        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--dir" => {
                    let Some(value) = iter.next() else {
                        return Err(CliError::InvalidCommandLineFlag);
                    };
                    dir = Some(value);
                }
                "--dbfilename" => {
                    let Some(value) = iter.next() else {
                        return Err(CliError::InvalidCommandLineFlag);
                    };
                    dbfilename = Some(value);
                }
                "--host" => {
                    let Some(value) = iter.next() else {
                        return Err(CliError::InvalidCommandLineFlag);
                    };
                    host = Some(value);
                }
                "--port" => {
                    let Some(value) = iter.next() else {
                        return Err(CliError::InvalidCommandLineFlag);
                    };
                    port = Some(validate_port(&value, CliError::InvalidPortFlagValue)?);
                }
                "--replicaof" => {
                    let Some(value) = iter.next() else {
                        return Err(CliError::InvalidCommandLineFlag);
                    };
                    replicaof = Some(validate_primary_address(&value)?);
                }
                _ => return Err(CliError::InvalidCommandLineFlag),
            }
        }

        Ok(Config {
            dir: dir.unwrap_or_default(),
            dbfilename: dbfilename.unwrap_or_else(|| "dump.rdb".to_string()),
            host: host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: port.unwrap_or(6379),
            replicaof,
        })
    }

    /// True when `--replicaof` was given.
    pub fn is_replica(&self) -> bool {
        self.replicaof.is_some()
    }

    /// Path of the snapshot file, `<dir>/<dbfilename>`.
    pub fn snapshot_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.dir).join(&self.dbfilename)
    }
}

fn validate_port(port: &str, error: CliError) -> Result<u16, CliError> {
    let port_number = port.parse::<u32>().map_err(|_| error.clone())?;

    if !(1..=65535).contains(&port_number) {
        return Err(error);
    }

    Ok(port_number as u16)
}

/// Validates a `"<host> <port>"` primary address specification.
///
/// The host may be an IPv4 address or a hostname; the port must be a valid
/// TCP port. Exactly two whitespace-separated fields are required.
fn validate_primary_address(primary_address: &str) -> Result<(String, u16), CliError> {
    let ipv4_regex = Regex::new(r"^(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})$").unwrap();
    let hostname_regex = Regex::new(r"^[a-zA-Z0-9\-\.]+$").unwrap();

    let split_address = primary_address.split_whitespace().collect::<Vec<&str>>();

    if split_address.len() != 2 {
        return Err(CliError::InvalidPrimaryAddress);
    }

    let address = split_address[0];

    let valid_address = if let Some(caps) = ipv4_regex.captures(address) {
        caps.iter().skip(1).all(|octet| {
            octet
                .map(|m| m.as_str().parse::<u16>().map(|v| v <= 255).unwrap_or(false))
                .unwrap_or(false)
        })
    } else {
        hostname_regex.is_match(address)
    };

    if !valid_address {
        return Err(CliError::InvalidPrimaryAddress);
    }

    let port_number = validate_port(split_address[1], CliError::InvalidPrimaryPort)?;

    Ok((address.to_string(), port_number))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Vec<String> {
        std::iter::once("emberdb")
            .chain(extra.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::new(args(&[])).unwrap();

        assert_eq!(config.dir, "");
        assert_eq!(config.dbfilename, "dump.rdb");
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 6379);
        assert_eq!(config.replicaof, None);
        assert!(!config.is_replica());
    }

    #[test]
    fn test_full_flag_set() {
        let config = Config::new(args(&[
            "--dir",
            "/tmp/data",
            "--dbfilename",
            "state.rdb",
            "--host",
            "127.0.0.1",
            "--port",
            "7000",
            "--replicaof",
            "127.0.0.1 6379",
        ]))
        .unwrap();

        assert_eq!(config.dir, "/tmp/data");
        assert_eq!(config.dbfilename, "state.rdb");
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 7000);
        assert_eq!(config.replicaof, Some(("127.0.0.1".to_string(), 6379)));
        assert!(config.is_replica());
        assert_eq!(
            config.snapshot_path(),
            std::path::PathBuf::from("/tmp/data/state.rdb")
        );
    }

    #[test]
    fn test_invalid_flags() {
        let test_cases = vec![
            (args(&["--port"]), CliError::InvalidCommandLineFlag),
            (args(&["--port", "abc"]), CliError::InvalidPortFlagValue),
            (args(&["--port", "0"]), CliError::InvalidPortFlagValue),
            (args(&["--port", "70000"]), CliError::InvalidPortFlagValue),
            (args(&["--unknown"]), CliError::InvalidCommandLineFlag),
            (args(&["--replicaof"]), CliError::InvalidCommandLineFlag),
            (
                args(&["--replicaof", "localhost"]),
                CliError::InvalidPrimaryAddress,
            ),
            (
                args(&["--replicaof", "localhost 6379 extra"]),
                CliError::InvalidPrimaryAddress,
            ),
            (
                args(&["--replicaof", "256.1.1.1 6379"]),
                CliError::InvalidPrimaryAddress,
            ),
            (
                args(&["--replicaof", "my_host! 6379"]),
                CliError::InvalidPrimaryAddress,
            ),
            (
                args(&["--replicaof", "localhost notaport"]),
                CliError::InvalidPrimaryPort,
            ),
            (
                args(&["--replicaof", "localhost 0"]),
                CliError::InvalidPrimaryPort,
            ),
        ];

        for (input, expected) in test_cases {
            let result = Config::new(input.clone());
            assert_eq!(result, Err(expected), "parsing {:?}", input);
        }
    }

    #[test]
    fn test_valid_primary_addresses() {
        let test_cases = vec![
            ("127.0.0.1 6379", ("127.0.0.1".to_string(), 6379)),
            ("localhost 6380", ("localhost".to_string(), 6380)),
            ("redis-primary 1024", ("redis-primary".to_string(), 1024)),
            ("example.com 65535", ("example.com".to_string(), 65535)),
        ];

        for (input, expected) in test_cases {
            assert_eq!(
                validate_primary_address(input),
                Ok(expected),
                "parsing {}",
                input
            );
        }
    }
}
