#![cfg(test)]

use std::sync::Arc;

use crate::config::{Config, EndpointLimit};
use crate::gateway_util::AppStateData;
use crate::store::StoreClient;

/// App state backed by the in-memory store, with a single-unit plan quota
/// and a generator base that always refuses connections (port 1), so tests
/// exercising the gates never reach the network path successfully.
pub fn get_unit_test_app_state_data() -> AppStateData {
    let mut config = Config::default();
    config.gateway.limits.generate_plan = EndpointLimit {
        limit: 1,
        window_seconds: 3_600,
    };
    config.generator.api_base = "http://127.0.0.1:1".to_string();
    config.generator.timeout_seconds = 2;

    #[expect(clippy::unwrap_used)]
    let app_state =
        AppStateData::new_with_store(Arc::new(config), StoreClient::new_mock()).unwrap();
    app_state
}
