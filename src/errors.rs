// src/errors.rs
use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VigilError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    Validation(String),

    #[error("Invalid JSON body: {0}")]
    InvalidBody(String),

    #[error("Payload exceeds limit of {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("Request rate limit exceeded for client")]
    TooManyRequests,

    #[error("Gemini request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Gemini rate limit (429): {message}")]
    RateLimited { message: String },

    #[error("Gemini rejected request (400): {message}")]
    BadRequest { message: String },

    #[error("Gemini authentication failed ({status}): {message}")]
    Auth { status: u16, message: String },

    #[error("Gemini transient error ({status}): {message}")]
    Transient { status: u16, message: String },

    #[error("Gemini returned an invalid envelope: {0}")]
    BadGateway(String),

    #[error("Gemini returned malformed analysis JSON: {0}")]
    MalformedResponse(String),

    #[error("Gemini error ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("Gemini request failed after retries ({status}): {message}")]
    UpstreamFailure { status: u16, message: String },

    #[error("Request cancelled")]
    Cancelled,
}

impl VigilError {
    /// Message safe to show to API clients. Never contains upstream text.
    pub fn user_message(&self) -> String {
        match self {
            VigilError::Configuration(_) => "AI service is not configured.".to_string(),
            VigilError::Validation(msg) => msg.clone(),
            VigilError::InvalidBody(_) => "Invalid JSON body.".to_string(),
            VigilError::PayloadTooLarge { .. } => "Request payload too large.".to_string(),
            VigilError::TooManyRequests => {
                "Too many requests, please try again later.".to_string()
            }
            VigilError::Timeout { .. } => "AI analysis timed out.".to_string(),
            VigilError::RateLimited { .. } => {
                "AI service rate limit reached, please retry later.".to_string()
            }
            VigilError::BadRequest { .. } => "AI service rejected the request.".to_string(),
            VigilError::Auth { .. } => "AI service authentication failed.".to_string(),
            VigilError::Transient { .. } => "AI service unavailable.".to_string(),
            VigilError::BadGateway(_) | VigilError::MalformedResponse(_) => {
                "AI service returned an invalid response.".to_string()
            }
            VigilError::Upstream { .. } | VigilError::UpstreamFailure { .. } => {
                "AI analysis failed.".to_string()
            }
            VigilError::Cancelled => "Request cancelled.".to_string(),
        }
    }

    /// Body for a failed request. `details` is only attached in development mode.
    pub fn to_response(&self, development: bool) -> HttpResponse {
        let mut body = serde_json::json!({ "error": self.user_message() });
        if development {
            body["details"] = serde_json::Value::String(self.to_string());
        }
        HttpResponse::build(self.status_code()).json(body)
    }

    pub fn for_client(self, development: bool) -> ApiError {
        ApiError {
            error: self,
            development,
        }
    }
}

/// A [`VigilError`] bound to the response mode of the running service.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct ApiError {
    pub error: VigilError,
    pub development: bool,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        self.error.status_code()
    }

    fn error_response(&self) -> HttpResponse {
        self.error.to_response(self.development)
    }
}

impl ResponseError for VigilError {
    fn status_code(&self) -> StatusCode {
        let code = match self {
            VigilError::Configuration(_) => 500,
            VigilError::Validation(_) | VigilError::InvalidBody(_) => 400,
            VigilError::PayloadTooLarge { .. } => 413,
            VigilError::TooManyRequests => 429,
            VigilError::Timeout { .. } => 504,
            VigilError::RateLimited { .. } => 429,
            VigilError::BadRequest { .. } => 400,
            VigilError::Auth { status, .. } => *status,
            VigilError::Transient { .. } => 502,
            VigilError::BadGateway(_) | VigilError::MalformedResponse(_) => 502,
            VigilError::Upstream { .. } | VigilError::UpstreamFailure { .. } => 500,
            VigilError::Cancelled => 499,
        };
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        self.to_response(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[test]
    fn auth_error_keeps_upstream_status() {
        let err = VigilError::Auth {
            status: 403,
            message: "forbidden".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn taxonomy_statuses() {
        assert_eq!(
            VigilError::Configuration("no key".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            VigilError::Timeout { timeout_ms: 10 }.status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            VigilError::MalformedResponse("x".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            VigilError::RateLimited {
                message: String::new()
            }
            .status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            VigilError::UpstreamFailure {
                status: 503,
                message: String::new()
            }
            .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[actix_web::test]
    async fn details_only_in_development() {
        let err = VigilError::BadRequest {
            message: "API key format invalid sk-123".to_string(),
        };

        let prod = to_bytes(err.to_response(false).into_body()).await.unwrap();
        let prod: serde_json::Value = serde_json::from_slice(&prod).unwrap();
        assert_eq!(prod["error"], "AI service rejected the request.");
        assert!(prod.get("details").is_none());

        let dev = to_bytes(err.to_response(true).into_body()).await.unwrap();
        let dev: serde_json::Value = serde_json::from_slice(&dev).unwrap();
        assert!(dev["details"].as_str().unwrap().contains("sk-123"));
    }

    #[actix_web::test]
    async fn invalid_body_hides_parser_text_in_production() {
        let err = VigilError::InvalidBody("expected value at line 1 column 2".to_string());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let prod = to_bytes(err.clone().for_client(false).error_response().into_body())
            .await
            .unwrap();
        let prod: serde_json::Value = serde_json::from_slice(&prod).unwrap();
        assert_eq!(prod["error"], "Invalid JSON body.");
        assert!(prod.get("details").is_none());

        let dev = to_bytes(err.for_client(true).error_response().into_body())
            .await
            .unwrap();
        let dev: serde_json::Value = serde_json::from_slice(&dev).unwrap();
        assert!(dev["details"].as_str().unwrap().contains("line 1 column 2"));
    }
}
