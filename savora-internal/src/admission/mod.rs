//! Admission control: per-device request quotas plus the entitlement gate.

pub mod limiter;

pub use limiter::AdmissionController;

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Serialize;

/// Endpoints that consume quota. Each carries its own fixed-window limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatedEndpoint {
    GeneratePlan,
    SwapMeal,
    SubstituteIngredient,
}

impl GatedEndpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatedEndpoint::GeneratePlan => "generate_plan",
            GatedEndpoint::SwapMeal => "swap_meal",
            GatedEndpoint::SubstituteIngredient => "substitute_ingredient",
        }
    }
}

/// Quota metadata returned with every gated response.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QuotaInfo {
    pub limit: u32,
    pub remaining: u32,
    /// Unix timestamp at which the current window ends
    pub reset_time: i64,
}

impl QuotaInfo {
    pub fn to_header_map(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        // Numbers always produce valid header values
        if let Ok(value) = HeaderValue::from_str(&self.limit.to_string()) {
            headers.insert("X-RateLimit-Limit", value);
        }
        if let Ok(value) = HeaderValue::from_str(&self.remaining.to_string()) {
            headers.insert("X-RateLimit-Remaining", value);
        }
        if let Ok(value) = HeaderValue::from_str(&self.reset_time.to_string()) {
            headers.insert("X-RateLimit-Reset", value);
        }
        headers
    }
}

/// Result of a quota check
#[derive(Debug)]
pub enum AdmissionDecision {
    Allow(QuotaInfo),
    Deny(QuotaInfo),
}

impl AdmissionDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AdmissionDecision::Allow(_))
    }

    pub fn quota(&self) -> &QuotaInfo {
        match self {
            AdmissionDecision::Allow(q) | AdmissionDecision::Deny(q) => q,
        }
    }
}

/// Result of the entitlement check
#[derive(Debug, PartialEq, Eq)]
pub enum EntitlementDecision {
    Allow,
    Deny,
}

/// Typed admission denials. A quota denial and an entitlement denial are
/// distinct outcomes; callers branch on which gate failed.
#[derive(Debug)]
pub enum AdmissionError {
    QuotaExceeded(QuotaInfo),
    SubscriptionRequired,
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        match self {
            AdmissionError::QuotaExceeded(quota) => {
                let retry_after = (quota.reset_time - Utc::now().timestamp()).max(0);
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    axum::Json(serde_json::json!({
                        "error": {
                            "message": "Request quota exceeded",
                            "type": "rate_limit_error",
                            "code": "quota_exceeded"
                        },
                        "quota": quota
                    })),
                )
                    .into_response();
                response.headers_mut().extend(quota.to_header_map());
                if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                    response.headers_mut().insert("Retry-After", value);
                }
                response
            }
            AdmissionError::SubscriptionRequired => (
                StatusCode::FORBIDDEN,
                axum::Json(serde_json::json!({
                    "error": {
                        "message": "An active subscription is required",
                        "type": "entitlement_error",
                        "code": "subscription_required"
                    }
                })),
            )
                .into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_headers() {
        let quota = QuotaInfo {
            limit: 10,
            remaining: 4,
            reset_time: 1_700_000_000,
        };
        let headers = quota.to_header_map();
        assert_eq!(headers.get("X-RateLimit-Limit").unwrap(), "10");
        assert_eq!(headers.get("X-RateLimit-Remaining").unwrap(), "4");
        assert_eq!(headers.get("X-RateLimit-Reset").unwrap(), "1700000000");
    }

    #[test]
    fn test_denial_status_codes_are_distinguishable() {
        let quota = QuotaInfo {
            limit: 1,
            remaining: 0,
            reset_time: 0,
        };
        let quota_response = AdmissionError::QuotaExceeded(quota).into_response();
        assert_eq!(quota_response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(quota_response.headers().contains_key("Retry-After"));

        let entitlement_response = AdmissionError::SubscriptionRequired.into_response();
        assert_eq!(entitlement_response.status(), StatusCode::FORBIDDEN);
    }
}
