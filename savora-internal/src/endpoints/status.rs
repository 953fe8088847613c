use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::gateway_util::AppState;

pub const SAVORA_VERSION: &str = env!("CARGO_PKG_VERSION");

pub async fn status_handler(State(app_state): AppState) -> Json<Value> {
    let store_healthy = app_state.store.healthy().await;
    Json(json!({
        "service": "savora-gateway",
        "version": SAVORA_VERSION,
        "store_healthy": store_healthy,
    }))
}

/// Liveness only; no business logic behind it.
pub async fn health_handler() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::get_unit_test_app_state_data;

    #[tokio::test]
    async fn test_status_reports_store_health() {
        let app_state = get_unit_test_app_state_data();
        let Json(body) = status_handler(State(app_state)).await;
        assert_eq!(body["service"], "savora-gateway");
        assert_eq!(body["store_healthy"], true);
    }
}
