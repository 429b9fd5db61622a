/*!
Error types for the configuration engine

Only the boundary can fail with an `Err`:
- the parameter bundle handed over by the VPN client
- the log sink setup

Failing OS commands are not errors here, they are recorded outcomes.
*/

use thiserror::Error;

/// Problems found while reading the connection parameter bundle
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParamError {
    #[error("Missing required parameter: {0}")]
    Missing(String),

    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },
}

impl ParamError {
    pub(crate) fn invalid(key: &str, value: &str) -> Self {
        ParamError::Invalid {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

/// Problems setting up the session log sink
#[derive(Error, Debug)]
pub enum LogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Logger already initialized: {0}")]
    AlreadySet(#[from] log::SetLoggerError),
}
