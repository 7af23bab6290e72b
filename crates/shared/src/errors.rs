use serde_json::{Value, json};
use thiserror::Error;

/// Closed taxonomy of failures that can surface to an HTTP caller.
///
/// Tool failures are deliberately absent: they are rendered in-band as error
/// frames and never abort a response.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("{message}")]
    InvalidArgument {
        message: String,
        invalid_fields: Vec<String>,
    },
    #[error("{api} integration failed: {message}")]
    Integration {
        api: String,
        message: String,
        cause: Option<String>,
    },
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn invalid_argument(message: impl Into<String>, invalid_fields: &[&str]) -> Self {
        Self::InvalidArgument {
            message: message.into(),
            invalid_fields: invalid_fields.iter().map(ToString::to_string).collect(),
        }
    }

    pub fn integration(
        api: impl Into<String>,
        message: impl Into<String>,
        cause: Option<String>,
    ) -> Self {
        Self::Integration {
            api: api.into(),
            message: message.into(),
            cause,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::Integration { .. } => "API_INTEGRATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::Internal(_) => "UNKNOWN_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidArgument { .. } => 400,
            Self::Integration { .. } => 502,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Internal(_) => 500,
        }
    }

    /// Client-facing message. Internal failures never leak their cause.
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => "An unexpected error occurred".to_string(),
            other => other.to_string(),
        }
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            Self::InvalidArgument { invalid_fields, .. } if !invalid_fields.is_empty() => {
                Some(json!({ "invalidArgs": invalid_fields }))
            }
            Self::Integration { api, cause, .. } => Some(json!({
                "api": api,
                "originalError": cause,
            })),
            _ => None,
        }
    }
}
