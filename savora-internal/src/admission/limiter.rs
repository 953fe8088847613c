//! Fixed-window quota accounting and the entitlement gate.

use std::time::Duration as StdDuration;

use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::admission::{AdmissionDecision, EntitlementDecision, GatedEndpoint, QuotaInfo};
use crate::config::{EndpointLimit, LimitsConfig};
use crate::error::{Error, ErrorDetails};
use crate::store::StoreClient;
use crate::subscription::{subscription_key, SubscriptionRecord};

const RATE_LIMIT_KEY_PREFIX: &str = "ratelimit:";

/// Window accounting for one (device, endpoint) pair. Owned exclusively by
/// the admission controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RateLimitRecord {
    device_id: String,
    endpoint: String,
    window_start: DateTime<Utc>,
    count: u32,
    last_request: DateTime<Utc>,
}

pub struct AdmissionController {
    store: StoreClient,
    generate_plan: EndpointLimit,
    swap_meal: EndpointLimit,
    substitute_ingredient: EndpointLimit,
}

impl AdmissionController {
    pub fn new(store: StoreClient, limits: &LimitsConfig) -> Self {
        Self {
            store,
            generate_plan: limits.generate_plan,
            swap_meal: limits.swap_meal,
            substitute_ingredient: limits.substitute_ingredient,
        }
    }

    fn limit_for(&self, endpoint: GatedEndpoint) -> EndpointLimit {
        match endpoint {
            GatedEndpoint::GeneratePlan => self.generate_plan,
            GatedEndpoint::SwapMeal => self.swap_meal,
            GatedEndpoint::SubstituteIngredient => self.substitute_ingredient,
        }
    }

    /// Consumes one quota unit if the window allows it.
    ///
    /// Fixed window with reset-on-expiry, not a sliding window: a client can
    /// issue up to 2x the limit across a window boundary. That burst is
    /// accepted behavior; downstream quota expectations assume this model.
    pub async fn check_and_consume(
        &self,
        device_id: &str,
        endpoint: GatedEndpoint,
    ) -> Result<AdmissionDecision, Error> {
        self.check_and_consume_at(device_id, endpoint, Utc::now())
            .await
    }

    /// The read-increment-or-reset sequence runs as an optimistic
    /// compare-and-swap with retry-on-conflict, so two concurrent requests
    /// for the same (device, endpoint) can never both slip under the limit.
    pub(crate) async fn check_and_consume_at(
        &self,
        device_id: &str,
        endpoint: GatedEndpoint,
        now: DateTime<Utc>,
    ) -> Result<AdmissionDecision, Error> {
        let limit = self.limit_for(endpoint);
        let window = Duration::from_std(limit.window()).map_err(|e| {
            Error::new(ErrorDetails::InternalError {
                message: format!("Window duration out of range: {e}"),
            })
        })?;
        let key = format!("{RATE_LIMIT_KEY_PREFIX}{}:{device_id}", endpoint.as_str());

        let attempt = || async {
            let current_raw = self.store.get_raw(&key).await?;
            let current: Option<RateLimitRecord> = match &current_raw {
                Some(raw) => serde_json::from_str(raw).map(Some).map_err(|e| {
                    Error::new(ErrorDetails::Serialization {
                        message: format!("Malformed rate limit record at `{key}`: {e}"),
                    })
                })?,
                None => None,
            };

            let record = match current {
                Some(record) if now < record.window_start + window => {
                    if record.count >= limit.limit {
                        // Denials write nothing, so the count invariant holds
                        return Ok(AdmissionDecision::Deny(QuotaInfo {
                            limit: limit.limit,
                            remaining: 0,
                            reset_time: (record.window_start + window).timestamp(),
                        }));
                    }
                    RateLimitRecord {
                        count: record.count + 1,
                        last_request: now,
                        ..record
                    }
                }
                // Expired or absent: a new window always starts with count=1
                _ => RateLimitRecord {
                    device_id: device_id.to_string(),
                    endpoint: endpoint.as_str().to_string(),
                    window_start: now,
                    count: 1,
                    last_request: now,
                },
            };

            let new_raw = serde_json::to_string(&record).map_err(|e| {
                Error::new(ErrorDetails::Serialization {
                    message: e.to_string(),
                })
            })?;
            if self
                .store
                .compare_and_swap(&key, current_raw.as_deref(), &new_raw)
                .await?
            {
                Ok(AdmissionDecision::Allow(QuotaInfo {
                    limit: limit.limit,
                    remaining: limit.limit - record.count,
                    reset_time: (record.window_start + window).timestamp(),
                }))
            } else {
                Err(Error::new_without_logging(ErrorDetails::StoreConflict {
                    key: key.clone(),
                }))
            }
        };

        let result = attempt
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(StdDuration::from_millis(10))
                    .with_max_times(6),
            )
            .when(|e: &Error| matches!(e.get_details(), ErrorDetails::StoreConflict { .. }))
            .await;

        // Exhausted retries fail closed
        match result {
            Err(e) if matches!(e.get_details(), ErrorDetails::StoreConflict { .. }) => {
                e.log();
                Err(e)
            }
            other => other,
        }
    }

    /// Entitlement gate.
    ///
    /// A missing record is deliberately fail-open (new device, implicit free
    /// trial) and must not be conflated with a store error, which propagates
    /// and fails closed.
    pub async fn require_entitlement(
        &self,
        device_id: &str,
    ) -> Result<EntitlementDecision, Error> {
        let record: Option<SubscriptionRecord> = self
            .store
            .get_json(&subscription_key(device_id))
            .await?;
        match record {
            None => Ok(EntitlementDecision::Allow),
            Some(record) if record.entitled() => Ok(EntitlementDecision::Allow),
            Some(_) => Ok(EntitlementDecision::Deny),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::SubscriptionStatus;
    use futures::future::join_all;

    fn controller_with_limit(store: StoreClient, limit: u32, window_seconds: u64) -> AdmissionController {
        let mut limits = LimitsConfig::default();
        limits.generate_plan = EndpointLimit {
            limit,
            window_seconds,
        };
        AdmissionController::new(store, &limits)
    }

    #[tokio::test]
    async fn test_quota_sequence_within_one_window() {
        let store = StoreClient::new_mock();
        let controller = controller_with_limit(store, 3, 60);
        let now = Utc::now();

        let mut reset_times = Vec::new();
        for expected_remaining in [2, 1, 0] {
            let decision = controller
                .check_and_consume_at("device-1", GatedEndpoint::GeneratePlan, now)
                .await
                .unwrap();
            assert!(decision.is_allowed());
            assert_eq!(decision.quota().remaining, expected_remaining);
            assert_eq!(decision.quota().limit, 3);
            reset_times.push(decision.quota().reset_time);
        }
        assert!(reset_times.windows(2).all(|pair| pair[0] == pair[1]));

        let denied = controller
            .check_and_consume_at("device-1", GatedEndpoint::GeneratePlan, now)
            .await
            .unwrap();
        assert!(!denied.is_allowed());
        assert_eq!(denied.quota().remaining, 0);
        assert_eq!(denied.quota().reset_time, reset_times[0]);
    }

    #[tokio::test]
    async fn test_expired_window_resets_with_count_one() {
        let store = StoreClient::new_mock();
        let controller = controller_with_limit(store, 2, 60);
        let now = Utc::now();

        for _ in 0..2 {
            controller
                .check_and_consume_at("device-1", GatedEndpoint::GeneratePlan, now)
                .await
                .unwrap();
        }
        let denied = controller
            .check_and_consume_at("device-1", GatedEndpoint::GeneratePlan, now)
            .await
            .unwrap();
        assert!(!denied.is_allowed());

        let later = now + Duration::seconds(61);
        let decision = controller
            .check_and_consume_at("device-1", GatedEndpoint::GeneratePlan, later)
            .await
            .unwrap();
        assert!(decision.is_allowed());
        assert_eq!(decision.quota().remaining, 1);
        assert_eq!(
            decision.quota().reset_time,
            (later + Duration::seconds(60)).timestamp()
        );
    }

    #[tokio::test]
    async fn test_endpoints_count_independently() {
        let store = StoreClient::new_mock();
        let controller = controller_with_limit(store, 1, 60);
        let now = Utc::now();

        let first = controller
            .check_and_consume_at("device-1", GatedEndpoint::GeneratePlan, now)
            .await
            .unwrap();
        assert!(first.is_allowed());
        let other_endpoint = controller
            .check_and_consume_at("device-1", GatedEndpoint::SwapMeal, now)
            .await
            .unwrap();
        assert!(other_endpoint.is_allowed());
        let other_device = controller
            .check_and_consume_at("device-2", GatedEndpoint::GeneratePlan, now)
            .await
            .unwrap();
        assert!(other_device.is_allowed());
    }

    #[tokio::test]
    async fn test_concurrent_requests_never_exceed_limit() {
        let store = StoreClient::new_mock();
        let controller = controller_with_limit(store, 3, 60);
        let now = Utc::now();

        let decisions = join_all((0..6).map(|_| {
            controller.check_and_consume_at("device-1", GatedEndpoint::GeneratePlan, now)
        }))
        .await;

        let allowed = decisions
            .iter()
            .filter(|d| d.as_ref().is_ok_and(AdmissionDecision::is_allowed))
            .count();
        assert_eq!(allowed, 3);
    }

    async fn seed_subscription(
        store: &StoreClient,
        device_id: &str,
        status: SubscriptionStatus,
        plans_generated: u32,
    ) {
        let mut record = SubscriptionRecord::new(device_id.to_string());
        record.status = status;
        record.plans_generated = plans_generated;
        store
            .put_json(&subscription_key(device_id), &record)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_entitlement_gate() {
        let store = StoreClient::new_mock();
        let controller = controller_with_limit(store.clone(), 3, 60);

        // Unknown device: implicit free trial
        assert_eq!(
            controller.require_entitlement("fresh-device").await.unwrap(),
            EntitlementDecision::Allow
        );

        // First use is free regardless of status
        seed_subscription(&store, "untried", SubscriptionStatus::Expired, 0).await;
        assert_eq!(
            controller.require_entitlement("untried").await.unwrap(),
            EntitlementDecision::Allow
        );

        for (device, status, expected) in [
            ("active", SubscriptionStatus::Active, EntitlementDecision::Allow),
            (
                "grace",
                SubscriptionStatus::BillingRetry,
                EntitlementDecision::Allow,
            ),
            ("none", SubscriptionStatus::None, EntitlementDecision::Deny),
            (
                "expired",
                SubscriptionStatus::Expired,
                EntitlementDecision::Deny,
            ),
            (
                "revoked",
                SubscriptionStatus::Revoked,
                EntitlementDecision::Deny,
            ),
        ] {
            seed_subscription(&store, device, status, 5).await;
            assert_eq!(
                controller.require_entitlement(device).await.unwrap(),
                expected,
                "status {status:?}"
            );
        }
    }
}
