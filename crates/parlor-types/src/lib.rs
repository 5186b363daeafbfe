//! Shared error taxonomy for the Parlor chat proxy.
//!
//! Every subsystem reports failures through [`ChatError`]. Callers branch on
//! the variant, never on message text; [`ChatError::http_status`] gives the
//! status code the HTTP layer answers with.

/// Unified error type for the auth gate, chat router, and provider adapters.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    // === Request Errors ===
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Configuration(String),

    // === Upstream Provider Errors ===
    #[error("Provider {provider} returned {}: {message}", status_label(*.status))]
    Upstream {
        provider: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Request to {provider} timed out after {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },

    #[error("Transport error talking to {provider}: {message}")]
    Transport { provider: String, message: String },

    // === Auth Errors ===
    #[error("No bearer token provided or header malformed")]
    MissingToken,

    #[error("Invalid identity token: {0}")]
    InvalidToken(String),

    // === Generic ===
    #[error("{0}")]
    Other(String),
}

fn status_label(status: Option<u16>) -> String {
    match status {
        Some(code) => format!("HTTP {code}"),
        None => "an unreadable response".to_string(),
    }
}

impl ChatError {
    /// Maps the error to the HTTP status the server answers with.
    ///
    /// Upstream errors propagate the provider's status; when the provider
    /// status is unknown (malformed payload) the answer is 500.
    pub fn http_status(&self) -> u16 {
        match self {
            ChatError::Validation(_) | ChatError::Configuration(_) => 400,
            ChatError::MissingToken => 401,
            ChatError::InvalidToken(_) => 403,
            ChatError::Upstream { status, .. } => match status {
                Some(code) if (400..=599).contains(code) => *code,
                _ => 500,
            },
            ChatError::Timeout { .. } => 504,
            ChatError::Transport { .. } | ChatError::Other(_) => 500,
        }
    }

    /// Returns `true` for failures raised by the auth gate.
    pub fn is_auth(&self) -> bool {
        matches!(self, ChatError::MissingToken | ChatError::InvalidToken(_))
    }

    /// Returns `true` if the error originated from an upstream provider call.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            ChatError::Upstream { .. } | ChatError::Timeout { .. } | ChatError::Transport { .. }
        )
    }
}

/// A convenience alias for `Result<T, ChatError>`.
pub type Result<T> = std::result::Result<T, ChatError>;
