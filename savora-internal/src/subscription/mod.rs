//! Subscription entitlement state, derived from platform-signed purchase
//! tokens and webhook notifications.

pub mod notifications;
pub mod verifier;

pub use verifier::{SubscriptionVerifier, VerifiedSubscription};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::store::StoreClient;

const SUBSCRIPTION_KEY_PREFIX: &str = "subscription:";
const TRANSACTION_INDEX_PREFIX: &str = "subscription:txn:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    None,
    Active,
    Expired,
    Revoked,
    BillingRetry,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::None => "none",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Revoked => "revoked",
            SubscriptionStatus::BillingRetry => "billing_retry",
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-device subscription state. Created on first verification, updated by
/// every later verification or webhook event, never deleted.
///
/// `plans_generated` is the one shared-write field: request handlers bump it
/// (increment-only) after a successful generation, everything else here
/// merges around it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub device_id: String,
    #[serde(default)]
    pub original_transaction_id: Option<String>,
    #[serde(default)]
    pub product_id: Option<String>,
    pub status: SubscriptionStatus,
    #[serde(default)]
    pub expires_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub purchase_date: Option<DateTime<Utc>>,
    pub plans_generated: u32,
    #[serde(default)]
    pub auto_renew_enabled: bool,
}

impl SubscriptionRecord {
    pub fn new(device_id: String) -> Self {
        Self {
            device_id,
            original_transaction_id: None,
            product_id: None,
            status: SubscriptionStatus::None,
            expires_date: None,
            purchase_date: None,
            plans_generated: 0,
            auto_renew_enabled: false,
        }
    }

    /// Entitled when on an active or grace-period subscription, or before
    /// the first generated plan (first use is always free).
    pub fn entitled(&self) -> bool {
        matches!(
            self.status,
            SubscriptionStatus::Active | SubscriptionStatus::BillingRetry
        ) || self.plans_generated == 0
    }
}

pub fn subscription_key(device_id: &str) -> String {
    format!("{SUBSCRIPTION_KEY_PREFIX}{device_id}")
}

pub fn transaction_index_key(original_transaction_id: &str) -> String {
    format!("{TRANSACTION_INDEX_PREFIX}{original_transaction_id}")
}

/// Increment-only merge of the shared-write `plans_generated` field. Creates
/// the record when a device generates before ever verifying a purchase.
pub async fn increment_plans_generated(
    store: &StoreClient,
    device_id: &str,
) -> Result<(), Error> {
    store
        .update_json_with_retry(
            &subscription_key(device_id),
            |current: Option<SubscriptionRecord>| {
                let mut record =
                    current.unwrap_or_else(|| SubscriptionRecord::new(device_id.to_string()));
                record.plans_generated += 1;
                record
            },
        )
        .await
        .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entitlement_matrix() {
        let mut record = SubscriptionRecord::new("device-1".to_string());
        // Fresh record: free trial
        assert!(record.entitled());

        record.plans_generated = 1;
        assert!(!record.entitled());

        record.status = SubscriptionStatus::Active;
        assert!(record.entitled());

        record.status = SubscriptionStatus::BillingRetry;
        assert!(record.entitled());

        record.status = SubscriptionStatus::Expired;
        assert!(!record.entitled());

        record.status = SubscriptionStatus::Revoked;
        assert!(!record.entitled());

        // Status alone never matters before the first plan
        record.plans_generated = 0;
        assert!(record.entitled());
    }

    #[tokio::test]
    async fn test_increment_plans_generated_creates_and_merges() {
        let store = StoreClient::new_mock();
        increment_plans_generated(&store, "device-1").await.unwrap();
        increment_plans_generated(&store, "device-1").await.unwrap();

        let record: SubscriptionRecord = store
            .get_json(&subscription_key("device-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.plans_generated, 2);
        assert_eq!(record.status, SubscriptionStatus::None);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&SubscriptionStatus::BillingRetry).unwrap(),
            r#""billing_retry""#
        );
    }
}
