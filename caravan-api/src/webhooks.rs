use axum::{body::Bytes, extract::State, http::HeaderMap, routing::post, Json, Router};
use caravan_core::payment::PaymentStatus;
use caravan_core::DomainError;
use caravan_pooling::Member;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use uuid::Uuid;

use crate::{error::AppError, state::AppState};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying `sha256=<hex>` of the raw request body, keyed with the webhook secret.
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Payment result delivered by the processor.
#[derive(Debug, Deserialize)]
pub struct PaymentWebhook {
    pub payment_id: String,
    pub member_id: Uuid,
    pub status: PaymentStatus,
    pub amount: Option<i64>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/webhooks/payments", post(handle_payment_webhook))
}

/// Signs a webhook body the way the processor does.
pub fn sign_payload(payload: &[u8], secret: &str) -> Result<String, AppError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(format!("Failed to create HMAC: {}", e)))?;
    mac.update(payload);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

fn verify_signature(headers: &HeaderMap, payload: &[u8], secret: &str) -> Result<(), AppError> {
    if secret.is_empty() {
        tracing::warn!("Payment webhook rejected: no webhook secret configured");
        return Err(AppError::Unauthorized("webhook signature not accepted".into()));
    }
    let provided = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("sha256="))
        .ok_or_else(|| AppError::Unauthorized("missing webhook signature".into()))?;
    let provided = hex::decode(provided)
        .map_err(|_| AppError::Unauthorized("malformed webhook signature".into()))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(format!("Failed to create HMAC: {}", e)))?;
    mac.update(payload);
    mac.verify_slice(&provided)
        .map_err(|_| AppError::Unauthorized("invalid webhook signature".into()))
}

/// POST /v1/webhooks/payments
/// Only deliveries signed with the shared secret reach the group; redeliveries are answered
/// with the member's current state.
async fn handle_payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Member>, AppError> {
    if let Err(e) = verify_signature(&headers, &body, &state.auth.webhook_secret) {
        tracing::warn!("Rejected payment webhook: {}", e);
        return Err(e);
    }
    let payload: PaymentWebhook = serde_json::from_slice(&body)
        .map_err(|e| DomainError::Validation(format!("invalid webhook payload: {}", e)))?;

    tracing::info!(
        "Received payment webhook: {:?} for member {} ({})",
        payload.status,
        payload.member_id,
        payload.payment_id
    );

    let member = match payload.status {
        PaymentStatus::Succeeded => {
            let amount = payload.amount.ok_or_else(|| {
                DomainError::Validation("amount is required for a successful payment".into())
            })?;
            state
                .pooling
                .on_payment_verified(payload.member_id, &payload.payment_id, amount)
                .await?
        }
        PaymentStatus::Failed => {
            state
                .pooling
                .on_payment_failed(payload.member_id, Some(&payload.payment_id))
                .await?
        }
    };

    Ok(Json(member))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn signed(payload: &[u8], secret: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            SIGNATURE_HEADER,
            HeaderValue::from_str(&sign_payload(payload, secret).unwrap()).unwrap(),
        );
        headers
    }

    #[test]
    fn test_signature_round_trip() {
        let body = br#"{"payment_id":"pay_1"}"#;
        assert!(verify_signature(&signed(body, "whsec"), body, "whsec").is_ok());
    }

    #[test]
    fn test_signature_rejections() {
        let body = br#"{"payment_id":"pay_1"}"#;
        // wrong key
        assert!(matches!(
            verify_signature(&signed(body, "other"), body, "whsec"),
            Err(AppError::Unauthorized(_))
        ));
        // body altered after signing
        assert!(matches!(
            verify_signature(&signed(body, "whsec"), br#"{"payment_id":"pay_2"}"#, "whsec"),
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            verify_signature(&HeaderMap::new(), body, "whsec"),
            Err(AppError::Unauthorized(_))
        ));
        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_static("sha256=zz"));
        assert!(matches!(
            verify_signature(&headers, body, "whsec"),
            Err(AppError::Unauthorized(_))
        ));
        // an unset secret accepts nothing, not even an empty-key signature
        assert!(matches!(
            verify_signature(&signed(body, ""), body, ""),
            Err(AppError::Unauthorized(_))
        ));
    }
}
