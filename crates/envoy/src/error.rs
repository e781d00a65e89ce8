use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Connection, timeout or body transfer failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The server answered with a non-success status.
    #[error("{0}")]
    Streaming(#[from] StreamingError),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ClientError {
    /// Whether a fresh attempt could succeed. Client errors other than
    /// timeouts and rate limiting are not retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Http(err) => err
                .status()
                .is_none_or(|status| retryable_status(status.as_u16())),
            ClientError::Streaming(err) => err.is_retryable(),
            ClientError::Serde(_) | ClientError::Config(_) => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Http(err) => err.status().map(|s| s.as_u16()),
            ClientError::Streaming(err) => Some(err.status),
            _ => None,
        }
    }

    /// Headline shown to the user for a failed message.
    pub fn title(&self) -> String {
        match self {
            ClientError::Streaming(err) => err.title(),
            ClientError::Http(err) if err.is_timeout() => "Request timed out".to_string(),
            ClientError::Http(err) if err.is_connect() => "Connection failed".to_string(),
            _ => "An error occurred, please try again".to_string(),
        }
    }

    pub fn description(&self) -> String {
        match self {
            ClientError::Streaming(err) => err.description(),
            other => other.to_string(),
        }
    }
}

/// A non-success response to a chat API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingError {
    pub status: u16,
    pub status_text: String,
    /// `detail` field of a JSON error body, when the server sent one.
    pub detail: Option<String>,
}

impl StreamingError {
    pub fn new(status: u16, status_text: impl Into<String>) -> Self {
        Self {
            status,
            status_text: status_text.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Builds the error from a response, reading `detail` from its body.
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        let error = Self::new(status.as_u16(), status.canonical_reason().unwrap_or_default());

        match response.bytes().await {
            Ok(body) => match Self::detail_from_body(&body) {
                Some(detail) => error.with_detail(detail),
                None => error,
            },
            Err(_) => error,
        }
    }

    /// Extracts `detail` from a JSON error body. Non-string details (such as
    /// validation error lists) are kept as compact JSON.
    pub fn detail_from_body(body: &[u8]) -> Option<String> {
        let value: serde_json::Value = serde_json::from_slice(body).ok()?;
        match value.get("detail")? {
            serde_json::Value::Null => None,
            serde_json::Value::String(detail) if detail.is_empty() => None,
            serde_json::Value::String(detail) => Some(detail.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn is_retryable(&self) -> bool {
        retryable_status(self.status)
    }

    pub fn title(&self) -> String {
        if self.status_text.is_empty() {
            format!("Error code {}", self.status)
        } else {
            format!("{}, error code {}", self.status_text, self.status)
        }
    }

    pub fn description(&self) -> String {
        match &self.detail {
            Some(detail) => detail.clone(),
            None if !self.status_text.is_empty() => self.status_text.clone(),
            None => "An unknown error occurred".to_string(),
        }
    }
}

impl fmt::Display for StreamingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {}", self.title(), detail),
            None => f.write_str(&self.title()),
        }
    }
}

impl std::error::Error for StreamingError {}

/// Client errors fail the same way on every attempt, except request
/// timeouts and rate limiting.
fn retryable_status(status: u16) -> bool {
    !(400..500).contains(&status) || status == 408 || status == 429
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detail_from_string_body() {
        let detail = StreamingError::detail_from_body(br#"{"detail":"Chat not found"}"#);
        assert_eq!(detail.as_deref(), Some("Chat not found"));
    }

    #[test]
    fn test_detail_from_structured_body() {
        let detail =
            StreamingError::detail_from_body(br#"{"detail":[{"loc":["body"],"msg":"required"}]}"#);
        assert_eq!(
            detail.as_deref(),
            Some(r#"[{"loc":["body"],"msg":"required"}]"#)
        );
    }

    #[test]
    fn test_detail_missing_or_not_json() {
        assert_eq!(StreamingError::detail_from_body(b"Internal Server Error"), None);
        assert_eq!(StreamingError::detail_from_body(br#"{"error":"x"}"#), None);
        assert_eq!(StreamingError::detail_from_body(br#"{"detail":null}"#), None);
        assert_eq!(StreamingError::detail_from_body(b""), None);
    }

    #[test]
    fn test_title_and_description() {
        let err = StreamingError::new(404, "Not Found").with_detail("Chat not found");
        assert_eq!(err.title(), "Not Found, error code 404");
        assert_eq!(err.description(), "Chat not found");
        assert_eq!(err.to_string(), "Not Found, error code 404: Chat not found");

        let err = StreamingError::new(599, "");
        assert_eq!(err.title(), "Error code 599");
        assert_eq!(err.description(), "An unknown error occurred");
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(StreamingError::new(500, "Internal Server Error").is_retryable());
        assert!(StreamingError::new(503, "Service Unavailable").is_retryable());
        assert!(StreamingError::new(429, "Too Many Requests").is_retryable());
        assert!(StreamingError::new(408, "Request Timeout").is_retryable());
        assert!(!StreamingError::new(400, "Bad Request").is_retryable());
        assert!(!StreamingError::new(404, "Not Found").is_retryable());

        let err = ClientError::from(StreamingError::new(404, "Not Found"));
        assert!(!err.is_retryable());
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.title(), "Not Found, error code 404");
    }

    #[tokio::test]
    async fn test_transport_error_without_status_is_retryable() {
        let err = reqwest::Client::new()
            .get("http://[::1")
            .build()
            .unwrap_err();
        let err = ClientError::from(err);
        assert_eq!(err.status(), None);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_status_rule_keeps_timeouts_and_rate_limits() {
        assert!(retryable_status(502));
        assert!(retryable_status(408));
        assert!(retryable_status(429));
        assert!(!retryable_status(401));
        assert!(!retryable_status(422));
    }

    #[test]
    fn test_config_error_is_not_retryable() {
        let err = ClientError::Config("bad url".to_string());
        assert!(!err.is_retryable());
        assert_eq!(err.title(), "An error occurred, please try again");
        assert_eq!(err.description(), "Invalid configuration: bad url");
    }
}
