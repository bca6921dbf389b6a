//! Relay error taxonomy
//!
//! Only configuration and connect failures surface to the caller. Transport
//! failures after connect are absorbed by the connection manager: the live
//! connection reference is cleared and later requests queue until the next
//! configuration event.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced to the relay caller
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("invalid relay configuration: {0}")]
    Config(String),
    #[error("failed to read config file: {}", path.display())]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config file is not valid TOML: {}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to connect to remote watcher at {addr}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}
