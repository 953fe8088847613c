//! Payload types and status mapping for the asynchronous platform webhook.

use serde::Deserialize;

use crate::subscription::SubscriptionStatus;

/// Outer webhook body; the actual notification is a signed JWS.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationBody {
    pub signed_payload: String,
}

/// Decoded notification payload (the JWS claims).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub notification_type: String,
    #[serde(default)]
    pub subtype: Option<String>,
    pub data: NotificationData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    #[serde(default)]
    pub signed_transaction_info: Option<String>,
    #[serde(default)]
    pub signed_renewal_info: Option<String>,
}

/// What a notification means for the stored record. `status: None` means
/// the notification only toggles auto-renew (or is unknown to us).
#[derive(Debug, PartialEq)]
pub struct StatusChange {
    pub status: Option<SubscriptionStatus>,
    pub auto_renew_enabled: Option<bool>,
}

pub fn status_change(notification_type: &str, subtype: Option<&str>) -> StatusChange {
    match notification_type {
        "SUBSCRIBED" | "DID_RENEW" | "OFFER_REDEEMED" => StatusChange {
            status: Some(SubscriptionStatus::Active),
            auto_renew_enabled: Some(true),
        },
        // Payment failed; the platform keeps retrying while the user is in
        // the grace period
        "DID_FAIL_TO_RENEW" => StatusChange {
            status: Some(SubscriptionStatus::BillingRetry),
            auto_renew_enabled: None,
        },
        "EXPIRED" | "GRACE_PERIOD_EXPIRED" => StatusChange {
            status: Some(SubscriptionStatus::Expired),
            auto_renew_enabled: None,
        },
        "REFUND" | "REVOKE" => StatusChange {
            status: Some(SubscriptionStatus::Revoked),
            auto_renew_enabled: None,
        },
        "DID_CHANGE_RENEWAL_STATUS" => StatusChange {
            status: None,
            auto_renew_enabled: match subtype {
                Some("AUTO_RENEW_ENABLED") => Some(true),
                Some("AUTO_RENEW_DISABLED") => Some(false),
                _ => None,
            },
        },
        _ => StatusChange {
            status: None,
            auto_renew_enabled: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renewal_and_retry_mapping() {
        assert_eq!(
            status_change("DID_RENEW", None).status,
            Some(SubscriptionStatus::Active)
        );
        assert_eq!(
            status_change("DID_FAIL_TO_RENEW", Some("GRACE_PERIOD")).status,
            Some(SubscriptionStatus::BillingRetry)
        );
        assert_eq!(
            status_change("EXPIRED", Some("VOLUNTARY")).status,
            Some(SubscriptionStatus::Expired)
        );
        assert_eq!(
            status_change("REFUND", None).status,
            Some(SubscriptionStatus::Revoked)
        );
    }

    #[test]
    fn test_renewal_status_toggle_changes_nothing_else() {
        let change = status_change("DID_CHANGE_RENEWAL_STATUS", Some("AUTO_RENEW_DISABLED"));
        assert_eq!(change.status, None);
        assert_eq!(change.auto_renew_enabled, Some(false));
    }

    #[test]
    fn test_unknown_notification_is_a_no_op() {
        let change = status_change("PRICE_INCREASE", None);
        assert_eq!(change.status, None);
        assert_eq!(change.auto_renew_enabled, None);
    }

    #[test]
    fn test_notification_body_parses_camel_case() {
        let body: NotificationBody =
            serde_json::from_str(r#"{"signedPayload": "abc.def.ghi"}"#).unwrap();
        assert_eq!(body.signed_payload, "abc.def.ghi");
    }
}
