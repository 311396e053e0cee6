//! Error types for permission operations

use rxperm_api::RequestToken;
use thiserror::Error;

use crate::host::HostError;

/// Failure of a permission query or request
#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("Host permission API failed: {0}")]
    Host(#[from] HostError),

    #[error("Permission request {token} was abandoned before the host answered")]
    Abandoned { token: RequestToken },
}

impl PermissionError {
    /// Whether this error came from the host platform rather than local bookkeeping
    pub fn is_host_error(&self) -> bool {
        matches!(self, Self::Host(_))
    }
}
