use std::time::Duration;

use thiserror::Error;

use crate::llm::types::ProviderKind;

#[derive(Debug, Error)]
pub enum VlmError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{provider}: {message}")]
    Capability {
        provider: ProviderKind,
        message: String,
    },

    #[error("{provider} API error ({status}): {body}")]
    Api {
        provider: ProviderKind,
        status: u16,
        body: String,
    },

    #[error("Empty response from {provider}: {detail}")]
    EmptyResponse {
        provider: ProviderKind,
        detail: String,
    },

    #[error("{provider} request timed out ({}s)", .after.as_secs())]
    Timeout {
        provider: ProviderKind,
        after: Duration,
    },

    #[error("{provider} request cancelled")]
    Cancelled { provider: ProviderKind },

    #[error("{provider} transport error: {source}")]
    Transport {
        provider: ProviderKind,
        #[source]
        source: reqwest::Error,
    },

    #[error("Image error: {0}")]
    Image(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),


    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl VlmError {
    /// Failures that happened on the wire (or waiting for it).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            VlmError::Api { .. }
                | VlmError::EmptyResponse { .. }
                | VlmError::Timeout { .. }
                | VlmError::Cancelled { .. }
                | VlmError::Transport { .. }
        )
    }

    /// The call was torn down by the deadline or by the caller.
    pub fn is_abort(&self) -> bool {
        matches!(self, VlmError::Timeout { .. } | VlmError::Cancelled { .. })
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            VlmError::Api { status, .. } => Some(*status),
            VlmError::Transport { source, .. } => source.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

impl serde::Serialize for VlmError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type VlmResult<T> = Result<T, VlmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_is_distinguishable() {
        let err = VlmError::Timeout {
            provider: ProviderKind::Anthropic,
            after: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "Anthropic request timed out (30s)");
        assert!(err.is_transport());
        assert!(err.is_abort());
    }

    #[test]
    fn api_error_embeds_backend_and_status() {
        let err = VlmError::Api {
            provider: ProviderKind::Ollama,
            status: 503,
            body: "model loading".into(),
        };
        assert_eq!(err.to_string(), "Ollama API error (503): model loading");
        assert_eq!(err.status(), Some(503));
        assert!(!err.is_abort());
    }

    #[test]
    fn config_errors_are_not_transport() {
        let err = VlmError::Config("missing key".into());
        assert!(!err.is_transport());
        assert_eq!(
            serde_json::to_string(&err).unwrap(),
            "\"Configuration error: missing key\""
        );
    }
}
