//! error taxonomy for the game core

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// report for a node that is not part of this session
    #[error("unknown satellite: {0}")]
    UnknownNode(String),

    #[error("rpc to {target} timed out after {after:?}")]
    RpcTimeout { target: String, after: Duration },

    #[error("rpc to {target} returned status {status}")]
    RpcStatus { target: String, status: u16 },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
