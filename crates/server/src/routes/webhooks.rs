//! Inbound payment gateway callbacks.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use store::Store;

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct PaymentWebhookRequest {
    pub transaction_id: String,
    pub status: String,
    #[serde(default)]
    pub gateway_response: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct PaymentWebhookResponse {
    pub outcome: &'static str,
    pub payment_id: String,
    pub payment_status: String,
}

/// POST /webhooks/payments: applies a gateway verdict.
///
/// Deliveries are idempotent: a replay answers `200` with outcome
/// `duplicate`.
pub async fn payment<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<PaymentWebhookRequest>,
) -> Result<Json<PaymentWebhookResponse>, ApiError> {
    let transaction_id = req.transaction_id.trim();
    if transaction_id.is_empty() {
        return Err(ApiError::BadRequest(
            "transaction_id must not be empty".to_string(),
        ));
    }

    let outcome = state
        .engine
        .payments
        .process_webhook(transaction_id, &req.status, req.gateway_response)
        .await?;

    let payment = outcome.payment();
    Ok(Json(PaymentWebhookResponse {
        outcome: outcome.as_str(),
        payment_id: payment.id.to_string(),
        payment_status: payment.status.to_string(),
    }))
}
