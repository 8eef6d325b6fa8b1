//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fulfillment::{EngineError, ErrorKind};

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// Error raised by the fulfillment engine.
    Engine(EngineError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Engine(err) => status_for(err.kind()),
        }
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InsufficientStock
        | ErrorKind::InvalidStateTransition
        | ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::WebhookProcessing => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Gateway => StatusCode::BAD_GATEWAY,
        ErrorKind::Decryption | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::BadRequest(msg) => msg,
            ApiError::Engine(err) => {
                if status.is_server_error() {
                    tracing::error!(error = %err, "internal server error");
                }
                err.to_string()
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError::Engine(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{OrderError, OrderStatus, ProductId};
    use fulfillment::{GatewayError, VaultError};

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                EngineError::NotFound {
                    entity: "order",
                    id: "x".into(),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                EngineError::InsufficientStock {
                    product_id: ProductId::new("SKU-001"),
                    requested: 2,
                    available: 1,
                },
                StatusCode::CONFLICT,
            ),
            (
                EngineError::Order(OrderError::InvalidStateTransition {
                    current_state: OrderStatus::Completed,
                    action: "cancel",
                }),
                StatusCode::CONFLICT,
            ),
            (EngineError::Unauthorized("no".into()), StatusCode::FORBIDDEN),
            (EngineError::AlreadyExists("dup".into()), StatusCode::CONFLICT),
            (EngineError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (
                EngineError::WebhookProcessing("REVERSED".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                EngineError::Gateway(GatewayError::Unavailable("down".into())),
                StatusCode::BAD_GATEWAY,
            ),
            (
                EngineError::Vault(VaultError::Decryption("tag".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), expected);
        }
    }

    #[test]
    fn test_bad_request() {
        let response = ApiError::BadRequest("missing field".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
