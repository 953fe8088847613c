//! Subscription verification endpoints: the client-initiated token check and
//! the asynchronous platform webhook. Neither consumes quota, so neither
//! goes through the admission controller; the webhook trusts nothing until
//! its own signature verifies.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::endpoints::require_device_id;
use crate::error::Error;
use crate::gateway_util::{AppState, StructuredJson};
use crate::subscription::notifications::NotificationBody;
use crate::subscription::VerifiedSubscription;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifySubscriptionParams {
    pub device_id: String,
    pub signed_transaction: String,
}

pub async fn verify_subscription_handler(
    State(app_state): AppState,
    StructuredJson(params): StructuredJson<VerifySubscriptionParams>,
) -> Result<Json<VerifiedSubscription>, Error> {
    let device_id = require_device_id(&params.device_id)?;
    let verified = app_state
        .verifier
        .verify_and_store(device_id, &params.signed_transaction)
        .await?;
    Ok(Json(verified))
}

pub async fn platform_notifications_handler(
    State(app_state): AppState,
    StructuredJson(body): StructuredJson<NotificationBody>,
) -> Result<StatusCode, Error> {
    app_state
        .verifier
        .process_notification(&body.signed_payload)
        .await?;
    // The platform retries non-2xx responses; handled notifications always
    // acknowledge, even when the transaction id is unknown to us
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorDetails;
    use crate::testing::get_unit_test_app_state_data;

    #[tokio::test]
    async fn test_forged_token_is_rejected_with_unauthorized() {
        let app_state = get_unit_test_app_state_data();
        let result = verify_subscription_handler(
            State(app_state),
            StructuredJson(VerifySubscriptionParams {
                device_id: "device-1".to_string(),
                signed_transaction: "eyJhbGciOiJFUzI1NiJ9.e30.sig".to_string(),
            }),
        )
        .await;
        let error = result.unwrap_err();
        assert_eq!(error.status_code(), StatusCode::UNAUTHORIZED);
        assert!(matches!(
            error.get_details(),
            ErrorDetails::SignatureVerification { .. }
        ));
    }

    #[tokio::test]
    async fn test_webhook_rejects_unsigned_payload() {
        let app_state = get_unit_test_app_state_data();
        let result = platform_notifications_handler(
            State(app_state),
            StructuredJson(NotificationBody {
                signed_payload: "not-a-jws".to_string(),
            }),
        )
        .await;
        assert!(result.is_err());
    }
}
