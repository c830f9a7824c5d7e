use std::net::SocketAddr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(String),

    #[error("health endpoint at {addr} not ready: {reason}")]
    NotReady { addr: SocketAddr, reason: String },

    #[error("unexpected status {0} from health endpoint")]
    UnexpectedStatus(u16),

    #[error("malformed health response: {0}")]
    Decode(String),

    #[error("health endpoint shutdown failed: {0}")]
    Shutdown(String),
}

pub type HealthResult<T> = Result<T, HealthError>;
