//! Error types and handling for the client-core library
//!
//! Errors are categorized to help with logging:
//!
//! - **Configuration Errors** - invalid profile settings, can't recover without fixing the profile
//! - **Signaling Errors** - the SIP layer refused or failed an operation
//! - **Protocol Errors** - malformed session descriptions from the remote party
//! - **Media Errors** - RTP sockets or audio devices could not be opened
//! - **State Errors** - invalid operation for the current call state, check state first

use thiserror::Error;

use crate::call::CallState;

/// Result type alias for client-core operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Error types for call control operations
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    /// Call related errors
    #[error("Invalid call state for {operation}: current state is {current_state}")]
    InvalidCallState {
        operation: String,
        current_state: CallState,
    },

    /// Media related errors
    #[error("Media error: {details}")]
    MediaError { details: String },

    /// Signaling layer errors
    #[error("Signaling error: {reason}")]
    SignalingError { reason: String },

    /// Protocol errors
    #[error("Invalid session description: {reason}")]
    InvalidSessionDescription { reason: String },

    /// Configuration errors
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfiguration { field: String, reason: String },

    #[error("Missing required configuration: {field}")]
    MissingConfiguration { field: String },
}

impl ClientError {
    /// Create an invalid call state error
    pub fn invalid_state(operation: impl Into<String>, current_state: CallState) -> Self {
        Self::InvalidCallState {
            operation: operation.into(),
            current_state,
        }
    }

    /// Create a signaling error
    pub fn signaling(reason: impl Into<String>) -> Self {
        Self::SignalingError { reason: reason.into() }
    }

    /// Create an invalid configuration error
    pub fn invalid_configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            ClientError::InvalidCallState { .. } => "call",
            ClientError::MediaError { .. } => "media",
            ClientError::SignalingError { .. } => "network",
            ClientError::InvalidSessionDescription { .. } => "protocol",
            ClientError::InvalidConfiguration { .. } | ClientError::MissingConfiguration { .. } => {
                "configuration"
            }
        }
    }
}

impl From<sippin_media_core::Error> for ClientError {
    fn from(err: sippin_media_core::Error) -> Self {
        match err {
            sippin_media_core::Error::SdpParse { line, reason } => ClientError::InvalidSessionDescription {
                reason: format!("line {}: {}", line, reason),
            },
            other => ClientError::MediaError {
                details: other.to_string(),
            },
        }
    }
}

impl From<sippin_infra_common::Error> for ClientError {
    fn from(err: sippin_infra_common::Error) -> Self {
        ClientError::InvalidConfiguration {
            field: "profile".to_string(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(ClientError::invalid_state("accept", CallState::Idle).category(), "call");
        assert_eq!(ClientError::signaling("503").category(), "network");
        assert_eq!(ClientError::invalid_configuration("user", "empty").category(), "configuration");
        assert_eq!(ClientError::MissingConfiguration { field: "user".into() }.category(), "configuration");
    }

    #[test]
    fn test_sdp_errors_map_to_protocol() {
        let err: ClientError = sippin_media_core::SessionDescription::parse("v=1\r\n").unwrap_err().into();
        assert_eq!(err.category(), "protocol");
        let err: ClientError = sippin_media_core::Error::AudioDevice("no microphone".into()).into();
        assert_eq!(err.category(), "media");
        assert_eq!(
            ClientError::invalid_state("transfer", CallState::IncomingRinging).to_string(),
            "Invalid call state for transfer: current state is incoming"
        );
    }
}
