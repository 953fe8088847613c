//! Gated generation endpoints: plan generation, meal swap, ingredient
//! substitution. Each runs the same pipeline: admission, external
//! generation, image matching, deduplication.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::admission::{
    AdmissionDecision, AdmissionError, EntitlementDecision, GatedEndpoint, QuotaInfo,
};
use crate::endpoints::require_device_id;
use crate::error::Error;
use crate::gateway_util::{AppState, AppStateData, StructuredJson};
use crate::generator::{
    GeneratePlanRequest, GenerationPreferences, RecipeDraft, SubstituteIngredientRequest,
    SwapMealRequest,
};
use crate::store::StoreClient;
use crate::subscription::increment_plans_generated;

const DEFAULT_PLAN_DAYS: u32 = 7;
const MAX_PLAN_DAYS: u32 = 14;
const DEFAULT_MEALS_PER_DAY: u32 = 3;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneratePlanParams {
    pub device_id: String,
    #[serde(default)]
    pub days: Option<u32>,
    #[serde(default)]
    pub meals_per_day: Option<u32>,
    #[serde(default)]
    pub preferences: Option<GenerationPreferences>,
}

#[derive(Debug, Serialize)]
pub struct PlannedMealResponse {
    pub day: u32,
    pub recipe: RecipeDraft,
    pub image_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GeneratePlanResponse {
    pub plan: Vec<PlannedMealResponse>,
    pub recipes_added: u32,
    pub recipes_duplicate: u32,
    pub quota: QuotaInfo,
}

pub async fn generate_plan_handler(
    State(app_state): AppState,
    StructuredJson(params): StructuredJson<GeneratePlanParams>,
) -> Result<Response, Error> {
    let device_id = require_device_id(&params.device_id)?;
    let quota = match admit(&app_state, device_id, GatedEndpoint::GeneratePlan).await? {
        Ok(quota) => quota,
        Err(denial) => return Ok(denial.into_response()),
    };

    let request = GeneratePlanRequest {
        days: params
            .days
            .unwrap_or(DEFAULT_PLAN_DAYS)
            .clamp(1, MAX_PLAN_DAYS),
        meals_per_day: params.meals_per_day.unwrap_or(DEFAULT_MEALS_PER_DAY),
        preferences: params.preferences.unwrap_or_default(),
    };
    let meals = app_state
        .generator
        .generate_plan(&app_state.http_client, &request)
        .await?;

    // Image diversity is a property of the whole plan: the batch call
    // threads its exclude set through sequentially
    let recipes: Vec<&RecipeDraft> = meals.iter().map(|meal| &meal.recipe).collect();
    let images = app_state.image_matcher.match_images(&recipes).await;

    let mut recipes_added = 0;
    let mut recipes_duplicate = 0;
    let mut plan = Vec::with_capacity(meals.len());
    for (meal, image_url) in meals.iter().zip(images) {
        match app_state.dedup.save_if_unique(&meal.recipe).await {
            Ok(outcome) if outcome.saved => recipes_added += 1,
            Ok(_) => recipes_duplicate += 1,
            Err(e) => {
                // Non-fatal: an uncounted duplicate beats a failed request
                warn!("Dedup failed for `{}`: {e}", meal.recipe.name);
                recipes_added += 1;
            }
        }
        plan.push(PlannedMealResponse {
            day: meal.day,
            recipe: meal.recipe.clone(),
            image_url,
        });
    }

    let body = GeneratePlanResponse {
        plan,
        recipes_added,
        recipes_duplicate,
        quota,
    };
    // The free-trial counter is bumped after the response is assembled; a
    // crash in between loses the tick for this request
    spawn_plans_generated_increment(&app_state.store, device_id);

    Ok(with_quota_headers(Json(body).into_response(), &quota))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SwapMealParams {
    pub device_id: String,
    pub meal_type: String,
    pub current_meal_name: String,
    #[serde(default)]
    pub preferences: Option<GenerationPreferences>,
}

#[derive(Debug, Serialize)]
pub struct SingleRecipeResponse {
    pub recipe: RecipeDraft,
    pub image_url: Option<String>,
    pub recipes_added: u32,
    pub recipes_duplicate: u32,
    pub quota: QuotaInfo,
}

pub async fn swap_meal_handler(
    State(app_state): AppState,
    StructuredJson(params): StructuredJson<SwapMealParams>,
) -> Result<Response, Error> {
    let device_id = require_device_id(&params.device_id)?;
    let quota = match admit(&app_state, device_id, GatedEndpoint::SwapMeal).await? {
        Ok(quota) => quota,
        Err(denial) => return Ok(denial.into_response()),
    };

    let request = SwapMealRequest {
        meal_type: params.meal_type,
        current_meal_name: params.current_meal_name,
        preferences: params.preferences.unwrap_or_default(),
    };
    let recipe = app_state
        .generator
        .swap_meal(&app_state.http_client, &request)
        .await?;

    let response = assemble_single_recipe_response(&app_state, recipe, quota).await;
    spawn_plans_generated_increment(&app_state.store, device_id);
    Ok(response)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubstituteIngredientParams {
    pub device_id: String,
    pub recipe_name: String,
    pub ingredient: String,
    #[serde(default)]
    pub replacement: Option<String>,
    #[serde(default)]
    pub preferences: Option<GenerationPreferences>,
}

pub async fn substitute_ingredient_handler(
    State(app_state): AppState,
    StructuredJson(params): StructuredJson<SubstituteIngredientParams>,
) -> Result<Response, Error> {
    let device_id = require_device_id(&params.device_id)?;
    let quota = match admit(&app_state, device_id, GatedEndpoint::SubstituteIngredient).await? {
        Ok(quota) => quota,
        Err(denial) => return Ok(denial.into_response()),
    };

    let request = SubstituteIngredientRequest {
        recipe_name: params.recipe_name,
        ingredient: params.ingredient,
        replacement: params.replacement,
        preferences: params.preferences.unwrap_or_default(),
    };
    let recipe = app_state
        .generator
        .substitute_ingredient(&app_state.http_client, &request)
        .await?;

    let response = assemble_single_recipe_response(&app_state, recipe, quota).await;
    spawn_plans_generated_increment(&app_state.store, device_id);
    Ok(response)
}

/// Entitlement first, then quota: a device out of trial with no subscription
/// hears "subscription required" without burning a quota unit.
async fn admit(
    app_state: &AppStateData,
    device_id: &str,
    endpoint: GatedEndpoint,
) -> Result<Result<QuotaInfo, AdmissionError>, Error> {
    if app_state.admission.require_entitlement(device_id).await? == EntitlementDecision::Deny {
        return Ok(Err(AdmissionError::SubscriptionRequired));
    }
    match app_state
        .admission
        .check_and_consume(device_id, endpoint)
        .await?
    {
        AdmissionDecision::Allow(quota) => Ok(Ok(quota)),
        AdmissionDecision::Deny(quota) => Ok(Err(AdmissionError::QuotaExceeded(quota))),
    }
}

async fn assemble_single_recipe_response(
    app_state: &AppStateData,
    recipe: RecipeDraft,
    quota: QuotaInfo,
) -> Response {
    let images = app_state.image_matcher.match_images(&[&recipe]).await;
    let image_url = images.into_iter().next().flatten();

    let (recipes_added, recipes_duplicate) = match app_state.dedup.save_if_unique(&recipe).await {
        Ok(outcome) if outcome.saved => (1, 0),
        Ok(_) => (0, 1),
        Err(e) => {
            warn!("Dedup failed for `{}`: {e}", recipe.name);
            (1, 0)
        }
    };

    let body = SingleRecipeResponse {
        recipe,
        image_url,
        recipes_added,
        recipes_duplicate,
        quota,
    };
    with_quota_headers(Json(body).into_response(), &quota)
}

fn with_quota_headers(mut response: Response, quota: &QuotaInfo) -> Response {
    response.headers_mut().extend(quota.to_header_map());
    response
}

fn spawn_plans_generated_increment(store: &StoreClient, device_id: &str) {
    let store = store.clone();
    let device_id = device_id.to_string();
    tokio::spawn(async move {
        if let Err(e) = increment_plans_generated(&store, &device_id).await {
            warn!("Failed to record generated plan for device {device_id}: {e}");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorDetails;
    use crate::subscription::{subscription_key, SubscriptionRecord, SubscriptionStatus};
    use crate::testing::get_unit_test_app_state_data;
    use axum::http::StatusCode;

    fn params(device_id: &str) -> GeneratePlanParams {
        GeneratePlanParams {
            device_id: device_id.to_string(),
            days: Some(3),
            meals_per_day: Some(2),
            preferences: None,
        }
    }

    #[tokio::test]
    async fn test_blank_device_id_is_rejected_before_any_store_access() {
        let app_state = get_unit_test_app_state_data();
        let result =
            generate_plan_handler(State(app_state), StructuredJson(params("  "))).await;
        let error = result.unwrap_err();
        assert!(matches!(
            error.get_details(),
            ErrorDetails::InvalidRequest { .. }
        ));
    }

    #[tokio::test]
    async fn test_unentitled_device_gets_subscription_required() {
        let app_state = get_unit_test_app_state_data();
        let mut record = SubscriptionRecord::new("device-1".to_string());
        record.status = SubscriptionStatus::Expired;
        record.plans_generated = 2;
        app_state
            .store
            .put_json(&subscription_key("device-1"), &record)
            .await
            .unwrap();

        let response =
            generate_plan_handler(State(app_state), StructuredJson(params("device-1")))
                .await
                .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_exhausted_quota_gets_429_with_headers() {
        let app_state = get_unit_test_app_state_data();

        // The single quota unit goes to a request that then fails at the
        // unreachable generator; the quota is still consumed
        let first =
            generate_plan_handler(State(app_state.clone()), StructuredJson(params("device-1")))
                .await;
        assert!(first.is_err());

        let second =
            generate_plan_handler(State(app_state), StructuredJson(params("device-1")))
                .await
                .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            second.headers().get("X-RateLimit-Remaining").unwrap(),
            "0"
        );
        assert!(second.headers().contains_key("Retry-After"));
    }

    #[tokio::test]
    async fn test_swap_meal_shares_the_gating_pattern() {
        let app_state = get_unit_test_app_state_data();
        let mut record = SubscriptionRecord::new("device-1".to_string());
        record.status = SubscriptionStatus::Revoked;
        record.plans_generated = 1;
        app_state
            .store
            .put_json(&subscription_key("device-1"), &record)
            .await
            .unwrap();

        let response = swap_meal_handler(
            State(app_state),
            StructuredJson(SwapMealParams {
                device_id: "device-1".to_string(),
                meal_type: "dinner".to_string(),
                current_meal_name: "Garlic Chicken".to_string(),
                preferences: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
