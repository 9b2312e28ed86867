//! Response Error Types

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::service::ServiceError;
use crate::transport::TransportError;
use crate::validation::ValidationError;

/// Fallback message when the API gave none
pub const UNKNOWN_API_ERROR: &str = "Unknown API request error";

/// Normalised error payload: what the caller gets back or sees published
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorDetails {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            name: name.into(),
            message: if message.trim().is_empty() {
                UNKNOWN_API_ERROR.to_string()
            } else {
                message
            },
            code: None,
            data: None,
        }
    }
}

impl std::fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)?;
        if let Some(code) = self.code {
            write!(f, " ({})", code)?;
        }
        Ok(())
    }
}

/// Errors surfaced by the public operations
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "error")]
pub enum ResponseError {
    /// The call failed on the way to, or inside, the API
    #[error("BadRequest: {0}")]
    BadRequest(ErrorDetails),

    /// Arguments rejected before any network call
    #[error("BadProps: {0}")]
    BadProps(ErrorDetails),

    /// The response could not be processed
    #[error("ProcessError: {0}")]
    ProcessError(ErrorDetails),
}

impl ResponseError {
    pub fn details(&self) -> &ErrorDetails {
        match self {
            Self::BadRequest(details) | Self::BadProps(details) | Self::ProcessError(details) => details,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BadRequest",
            Self::BadProps(_) => "BadProps",
            Self::ProcessError(_) => "ProcessError",
        }
    }
}

impl From<ValidationError> for ResponseError {
    fn from(err: ValidationError) -> Self {
        ResponseError::BadProps(ErrorDetails::new(err.error_name(), err.to_string()))
    }
}

impl From<TransportError> for ResponseError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Remote(remote) => ResponseError::BadRequest(ErrorDetails {
                code: remote.code,
                data: remote.data,
                ..ErrorDetails::new(remote.name, remote.message)
            }),
            other => ResponseError::BadRequest(ErrorDetails::new("ConnectionError", other.to_string())),
        }
    }
}

impl From<ServiceError> for ResponseError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NoService => ResponseError::BadRequest(ErrorDetails::new("BadRequest", "No Service")),
            ServiceError::Transport(e) => e.into(),
            ServiceError::Crypto(e) => ResponseError::ProcessError(ErrorDetails::new("CryptoError", e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CryptoError;
    use crate::transport::RemoteError;
    use serde_json::json;

    #[test]
    fn test_remote_error_keeps_fields() {
        let remote = RemoteError::new("NotFound", "No record found")
            .with_code(404)
            .with_data(json!({ "id": "t1" }));
        let err: ResponseError = ServiceError::Transport(remote.into()).into();

        assert_eq!(err.kind(), "BadRequest");
        assert_eq!(err.details().name, "NotFound");
        assert_eq!(err.details().code, Some(404));
        assert_eq!(err.details().data, Some(json!({ "id": "t1" })));
    }

    #[test]
    fn test_empty_message_defaults() {
        let err: ResponseError = TransportError::Remote(RemoteError::new("GeneralError", "")).into();
        assert_eq!(err.details().message, UNKNOWN_API_ERROR);
    }

    #[test]
    fn test_no_service() {
        let err: ResponseError = ServiceError::NoService.into();
        assert_eq!(err, ResponseError::BadRequest(ErrorDetails::new("BadRequest", "No Service")));
    }

    #[test]
    fn test_crypto_failure_is_process_error() {
        let err: ResponseError = ServiceError::Crypto(CryptoError::Decrypt("bad padding".into())).into();
        assert!(matches!(err, ResponseError::ProcessError(_)));
    }

    #[test]
    fn test_validation_is_bad_props() {
        let err: ResponseError = ValidationError::MissingArgument { name: "query" }.into();
        assert_eq!(err.kind(), "BadProps");
        assert_eq!(err.details().name, "ValidationError");
    }

    #[test]
    fn test_serialized_shape() {
        let err = ResponseError::BadProps(ErrorDetails::new("TypeError", "Key 'debug' must be of type number, got string"));
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "BadProps");
        assert_eq!(json["error"]["name"], "TypeError");
        assert!(json["error"].get("code").is_none());
    }
}
