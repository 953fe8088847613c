//! Client for the external generative content producer.
//!
//! The producer is opaque to this gateway: any failure (transport, non-2xx,
//! malformed payload, producer-reported error) collapses into a single
//! "generation failed" outcome, except timeouts which keep their own variant
//! so the caller can answer 408.

use std::time::Duration;

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::GeneratorConfig;
use crate::error::{Error, ErrorDetails};

/// Environment variable holding the producer API key, if the deployment
/// requires one.
const GENERATOR_API_KEY_VAR: &str = "SAVORA_GENERATOR_API_KEY";

#[derive(Debug)]
pub struct MealGeneratorProvider {
    api_base: String,
    credentials: GeneratorCredentials,
    timeout: Duration,
}

#[derive(Debug)]
enum GeneratorCredentials {
    Static(SecretString),
    None,
}

impl MealGeneratorProvider {
    pub fn new(config: &GeneratorConfig) -> Self {
        let credentials = match std::env::var(GENERATOR_API_KEY_VAR) {
            Ok(key) if !key.is_empty() => GeneratorCredentials::Static(key.into()),
            _ => GeneratorCredentials::None,
        };
        Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            credentials,
            timeout: config.timeout(),
        }
    }

    pub async fn generate_plan(
        &self,
        client: &Client,
        request: &GeneratePlanRequest,
    ) -> Result<Vec<PlannedMealDraft>, Error> {
        let payload: PlanPayload = self.post_json(client, "v1/plans", request).await?;
        if payload.meals.is_empty() {
            return Err(Error::new(ErrorDetails::Generation {
                message: "Producer returned an empty plan".to_string(),
            }));
        }
        Ok(payload.meals)
    }

    pub async fn swap_meal(
        &self,
        client: &Client,
        request: &SwapMealRequest,
    ) -> Result<RecipeDraft, Error> {
        let payload: RecipePayload = self.post_json(client, "v1/swaps", request).await?;
        Ok(payload.recipe)
    }

    pub async fn substitute_ingredient(
        &self,
        client: &Client,
        request: &SubstituteIngredientRequest,
    ) -> Result<RecipeDraft, Error> {
        let payload: RecipePayload = self.post_json(client, "v1/substitutions", request).await?;
        Ok(payload.recipe)
    }

    async fn post_json<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        client: &Client,
        path: &str,
        body: &Req,
    ) -> Result<Resp, Error> {
        let mut builder = client
            .post(format!("{}/{path}", self.api_base))
            .timeout(self.timeout)
            .json(body);
        if let GeneratorCredentials::Static(key) = &self.credentials {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::new(ErrorDetails::GenerationTimeout)
            } else {
                Error::new(ErrorDetails::Generation {
                    message: format!("Request to producer failed: {e}"),
                })
            }
        })?;

        let status = response.status();
        let raw = response.text().await.map_err(|e| {
            Error::new(ErrorDetails::Generation {
                message: format!("Failed to read producer response: {e}"),
            })
        })?;

        if !status.is_success() {
            return Err(Error::new(ErrorDetails::Generation {
                message: format!("Producer returned {status}"),
            }));
        }

        // The producer payload is loosely typed; map it into a tagged result
        // here at the boundary instead of passing raw JSON deeper in.
        match serde_json::from_str::<GeneratorApiResponse<Resp>>(&raw) {
            Ok(GeneratorApiResponse::Error { error }) => {
                Err(Error::new(ErrorDetails::Generation {
                    message: format!("Producer reported an error: {error}"),
                }))
            }
            Ok(GeneratorApiResponse::Success(value)) => Ok(value),
            Err(e) => Err(Error::new(ErrorDetails::Generation {
                message: format!("Malformed producer response: {e}"),
            })),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeneratorApiResponse<T> {
    Error { error: String },
    Success(T),
}

#[derive(Debug, Deserialize)]
struct PlanPayload {
    meals: Vec<PlannedMealDraft>,
}

#[derive(Debug, Deserialize)]
struct RecipePayload {
    recipe: RecipeDraft,
}

/// One slot of a generated multi-day plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedMealDraft {
    pub day: u32,
    pub recipe: RecipeDraft,
}

/// A recipe as produced by the external generator, already mapped into the
/// gateway's own types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeDraft {
    pub name: String,
    pub cuisine_type: String,
    pub meal_type: String,
    pub ingredients: Vec<IngredientDraft>,
    #[serde(default)]
    pub instructions: Vec<String>,
    #[serde(default)]
    pub macros: Option<MacroEstimate>,
}

impl RecipeDraft {
    pub fn ingredient_names(&self) -> Vec<String> {
        self.ingredients.iter().map(|i| i.name.clone()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngredientDraft {
    pub name: String,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacroEstimate {
    pub calories: f64,
    pub protein_g: f64,
    pub carbs_g: f64,
    pub fat_g: f64,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct GenerationPreferences {
    #[serde(default)]
    pub cuisine_preferences: Vec<String>,
    #[serde(default)]
    pub dietary_restrictions: Vec<String>,
    #[serde(default)]
    pub excluded_ingredients: Vec<String>,
    #[serde(default)]
    pub calorie_target: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct GeneratePlanRequest {
    pub days: u32,
    pub meals_per_day: u32,
    pub preferences: GenerationPreferences,
}

#[derive(Debug, Serialize)]
pub struct SwapMealRequest {
    pub meal_type: String,
    pub current_meal_name: String,
    pub preferences: GenerationPreferences,
}

#[derive(Debug, Serialize)]
pub struct SubstituteIngredientRequest {
    pub recipe_name: String,
    pub ingredient: String,
    pub replacement: Option<String>,
    pub preferences: GenerationPreferences,
}
