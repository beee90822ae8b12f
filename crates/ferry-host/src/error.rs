use ferry_bridge::{BridgeError, HostValue};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostServiceError {
    #[error("{0} is not available in this context")]
    Unavailable(&'static str),

    #[error("no file dialog is waiting for a selection")]
    NoPendingPick,

    #[error("host call failed: {0}")]
    Js(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

pub type Result<T> = std::result::Result<T, HostServiceError>;

impl From<HostServiceError> for HostValue {
    fn from(err: HostServiceError) -> Self {
        HostValue::error("Error", err.to_string())
    }
}
