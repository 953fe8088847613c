//! Tracks which generated recipes are materially new.
//!
//! Two tiers: an exact normalized-name lookup (cheap, high precision), then a
//! bounded fuzzy scan over records sharing the same cuisine and meal type
//! (catches rewordings of the same underlying recipe). The scan bound is a
//! precision/cost trade-off, not exhaustive correctness.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::generator::RecipeDraft;
use crate::similarity::word_similarity;
use crate::store::StoreClient;

const RECIPE_KEY_PREFIX: &str = "recipe:";
const INDEX_KEY_PREFIX: &str = "recipes:index:";

/// How many same-category records the fuzzy tier inspects, most recent
/// first.
pub const FUZZY_SCAN_LIMIT: usize = 50;

/// Ingredient-word similarity at or above which two generated recipes are
/// the same underlying recipe.
pub const DEDUP_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedRecipeRecord {
    pub id: Uuid,
    pub normalized_name: String,
    pub ingredient_names: Vec<String>,
    pub cuisine_type: String,
    pub meal_type: String,
    pub times_generated: u32,
    pub created_at: DateTime<Utc>,
    pub last_generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DedupOutcome {
    pub saved: bool,
    pub recipe_id: Uuid,
}

#[derive(Clone)]
pub struct DedupStore {
    store: StoreClient,
}

impl DedupStore {
    pub fn new(store: StoreClient) -> Self {
        Self { store }
    }

    /// Persists `recipe` if nothing equivalent exists yet, otherwise bumps
    /// the existing record's counters.
    ///
    /// The insert path is deliberately not atomic: two simultaneous "first"
    /// generations of the same new recipe can both insert. The cost is a
    /// one-time extra record, not user-visible incorrectness.
    pub async fn save_if_unique(&self, recipe: &RecipeDraft) -> Result<DedupOutcome, Error> {
        let normalized = normalize_name(&recipe.name);
        let key = recipe_key(&normalized);

        if let Some(existing) = self.store.get_json::<GeneratedRecipeRecord>(&key).await? {
            let updated = self.touch(&key, &existing).await?;
            return Ok(DedupOutcome {
                saved: false,
                recipe_id: updated.id,
            });
        }

        let index_key = index_key(&recipe.cuisine_type, &recipe.meal_type);
        let recent_names = self.store.list_range(&index_key, FUZZY_SCAN_LIMIT).await?;
        let ingredient_names = recipe.ingredient_names();
        for name in recent_names {
            let candidate_key = recipe_key(&name);
            let Some(record) = self
                .store
                .get_json::<GeneratedRecipeRecord>(&candidate_key)
                .await?
            else {
                continue;
            };
            if word_similarity(&ingredient_names, &record.ingredient_names) >= DEDUP_THRESHOLD {
                let updated = self.touch(&candidate_key, &record).await?;
                return Ok(DedupOutcome {
                    saved: false,
                    recipe_id: updated.id,
                });
            }
        }

        let now = Utc::now();
        let record = GeneratedRecipeRecord {
            id: Uuid::now_v7(),
            normalized_name: normalized.clone(),
            ingredient_names,
            cuisine_type: recipe.cuisine_type.trim().to_lowercase(),
            meal_type: recipe.meal_type.trim().to_lowercase(),
            times_generated: 1,
            created_at: now,
            last_generated_at: now,
        };
        self.store.put_json(&key, &record).await?;
        self.store.list_push_front(&index_key, &normalized).await?;
        Ok(DedupOutcome {
            saved: true,
            recipe_id: record.id,
        })
    }

    /// Increment-only counter bump; `seen` is the record we already read, so
    /// a lost read under the CAS recreates it rather than dropping counts.
    async fn touch(
        &self,
        key: &str,
        seen: &GeneratedRecipeRecord,
    ) -> Result<GeneratedRecipeRecord, Error> {
        let now = Utc::now();
        self.store
            .update_json_with_retry(key, |current: Option<GeneratedRecipeRecord>| {
                let mut record = current.unwrap_or_else(|| seen.clone());
                record.times_generated += 1;
                record.last_generated_at = now;
                record
            })
            .await
    }
}

fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

fn recipe_key(normalized_name: &str) -> String {
    format!("{RECIPE_KEY_PREFIX}{normalized_name}")
}

fn index_key(cuisine_type: &str, meal_type: &str) -> String {
    format!(
        "{INDEX_KEY_PREFIX}{}:{}",
        cuisine_type.trim().to_lowercase(),
        meal_type.trim().to_lowercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::IngredientDraft;

    fn draft(name: &str, cuisine: &str, meal: &str, ingredients: &[&str]) -> RecipeDraft {
        RecipeDraft {
            name: name.to_string(),
            cuisine_type: cuisine.to_string(),
            meal_type: meal.to_string(),
            ingredients: ingredients
                .iter()
                .map(|name| IngredientDraft {
                    name: (*name).to_string(),
                    quantity: None,
                    unit: None,
                })
                .collect(),
            instructions: Vec::new(),
            macros: None,
        }
    }

    #[tokio::test]
    async fn test_exact_name_match_increments_existing_record() {
        let store = StoreClient::new_mock();
        let dedup = DedupStore::new(store.clone());

        let first = dedup
            .save_if_unique(&draft("Garlic Chicken", "italian", "dinner", &["chicken", "garlic"]))
            .await
            .unwrap();
        assert!(first.saved);

        // Same name modulo case and whitespace, different ingredients: the
        // exact tier wins before any fuzzy scoring happens
        let second = dedup
            .save_if_unique(&draft("  garlic chicken ", "italian", "dinner", &["tofu"]))
            .await
            .unwrap();
        assert!(!second.saved);
        assert_eq!(second.recipe_id, first.recipe_id);

        let record: GeneratedRecipeRecord = store
            .get_json("recipe:garlic chicken")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.times_generated, 2);
        assert!(record.last_generated_at >= record.created_at);
    }

    #[tokio::test]
    async fn test_fuzzy_match_merges_reworded_recipe() {
        let store = StoreClient::new_mock();
        let dedup = DedupStore::new(store.clone());

        let first = dedup
            .save_if_unique(&draft(
                "Garlic Chicken Skillet",
                "italian",
                "dinner",
                &["chicken breast", "garlic", "olive oil"],
            ))
            .await
            .unwrap();
        assert!(first.saved);

        // {chicken, breast, garlic, olive, oil} vs {chicken, garlic, olive,
        // oil} -> 4/5 = 0.8, right at the threshold
        let second = dedup
            .save_if_unique(&draft(
                "Skillet Chicken With Garlic",
                "italian",
                "dinner",
                &["chicken", "garlic", "olive oil"],
            ))
            .await
            .unwrap();
        assert!(!second.saved);
        assert_eq!(second.recipe_id, first.recipe_id);
    }

    #[tokio::test]
    async fn test_dissimilar_recipes_stay_distinct() {
        let store = StoreClient::new_mock();
        let dedup = DedupStore::new(store.clone());

        let first = dedup
            .save_if_unique(&draft(
                "Garlic Chicken",
                "italian",
                "dinner",
                &["chicken", "garlic", "rice", "salt"],
            ))
            .await
            .unwrap();
        // 3/4 = 0.75, below the threshold
        let second = dedup
            .save_if_unique(&draft(
                "Chicken Rice Bowl",
                "italian",
                "dinner",
                &["chicken", "garlic", "rice"],
            ))
            .await
            .unwrap();
        assert!(first.saved);
        assert!(second.saved);
        assert_ne!(first.recipe_id, second.recipe_id);
    }

    #[tokio::test]
    async fn test_fuzzy_scan_is_scoped_to_cuisine_and_meal_type() {
        let store = StoreClient::new_mock();
        let dedup = DedupStore::new(store.clone());

        let first = dedup
            .save_if_unique(&draft("Garlic Chicken", "italian", "dinner", &["chicken", "garlic"]))
            .await
            .unwrap();
        // Identical ingredients but a different category: never scanned
        let second = dedup
            .save_if_unique(&draft("Chicken With Garlic", "thai", "dinner", &["chicken", "garlic"]))
            .await
            .unwrap();
        assert!(first.saved);
        assert!(second.saved);
        assert_ne!(first.recipe_id, second.recipe_id);
    }
}
