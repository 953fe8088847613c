//! Read-only access to the reference recipe corpus.
//!
//! The corpus is populated by a separate ingestion job; this gateway only
//! queries it. Index keys are lists of serialized entries, most recent
//! first, so a bounded read naturally favors fresh reference data.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::store::StoreClient;

const CUISINE_INDEX_PREFIX: &str = "corpus:cuisine:";
const MEAL_INDEX_PREFIX: &str = "corpus:meal:";
const ALL_INDEX_KEY: &str = "corpus:all";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeCorpusEntry {
    pub title: String,
    pub cuisine_type: String,
    pub meal_type: String,
    pub ingredients: Vec<CorpusIngredient>,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusIngredient {
    pub name: String,
}

impl RecipeCorpusEntry {
    pub fn ingredient_names(&self) -> Vec<String> {
        self.ingredients.iter().map(|i| i.name.clone()).collect()
    }
}

#[derive(Clone)]
pub struct RecipeCorpus {
    store: StoreClient,
}

impl RecipeCorpus {
    pub fn new(store: StoreClient) -> Self {
        Self { store }
    }

    pub async fn by_cuisine(&self, cuisine: &str, limit: usize) -> Vec<RecipeCorpusEntry> {
        let key = format!("{CUISINE_INDEX_PREFIX}{}", cuisine.trim().to_lowercase());
        self.read_index(&key, limit).await
    }

    pub async fn by_meal_type(&self, meal_type: &str, limit: usize) -> Vec<RecipeCorpusEntry> {
        let key = format!("{MEAL_INDEX_PREFIX}{}", meal_type.trim().to_lowercase());
        self.read_index(&key, limit).await
    }

    pub async fn any(&self, limit: usize) -> Vec<RecipeCorpusEntry> {
        self.read_index(ALL_INDEX_KEY, limit).await
    }

    /// Corpus reads never fail the caller: store errors and malformed
    /// entries degrade to an empty/shorter pool.
    async fn read_index(&self, key: &str, limit: usize) -> Vec<RecipeCorpusEntry> {
        let raw_entries = match self.store.list_range(key, limit).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Corpus index read failed for `{key}`: {e}");
                return Vec::new();
            }
        };
        raw_entries
            .iter()
            .filter_map(|raw| match serde_json::from_str(raw) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping malformed corpus entry under `{key}`: {e}");
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed(store: &StoreClient, entry: &RecipeCorpusEntry) {
        let raw = serde_json::to_string(entry).unwrap();
        let cuisine_key = format!(
            "{CUISINE_INDEX_PREFIX}{}",
            entry.cuisine_type.to_lowercase()
        );
        let meal_key = format!("{MEAL_INDEX_PREFIX}{}", entry.meal_type.to_lowercase());
        store.list_push_front(&cuisine_key, &raw).await.unwrap();
        store.list_push_front(&meal_key, &raw).await.unwrap();
        store.list_push_front(ALL_INDEX_KEY, &raw).await.unwrap();
    }

    fn entry(title: &str, cuisine: &str, meal: &str) -> RecipeCorpusEntry {
        RecipeCorpusEntry {
            title: title.to_string(),
            cuisine_type: cuisine.to_string(),
            meal_type: meal.to_string(),
            ingredients: vec![CorpusIngredient {
                name: "chicken".to_string(),
            }],
            image_url: Some(format!("https://img.test/{title}.jpg")),
        }
    }

    #[tokio::test]
    async fn test_queries_are_case_insensitive_and_bounded() {
        let store = StoreClient::new_mock();
        let corpus = RecipeCorpus::new(store.clone());
        seed(&store, &entry("a", "Italian", "dinner")).await;
        seed(&store, &entry("b", "italian", "lunch")).await;

        assert_eq!(corpus.by_cuisine("ITALIAN", 50).await.len(), 2);
        assert_eq!(corpus.by_cuisine("italian", 1).await.len(), 1);
        assert_eq!(corpus.by_meal_type("dinner", 50).await.len(), 1);
        assert_eq!(corpus.any(50).await.len(), 2);
        assert!(corpus.by_cuisine("thai", 50).await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_entries_are_skipped() {
        let store = StoreClient::new_mock();
        let corpus = RecipeCorpus::new(store.clone());
        seed(&store, &entry("a", "thai", "dinner")).await;
        store
            .list_push_front("corpus:cuisine:thai", "not json")
            .await
            .unwrap();

        let pool = corpus.by_cuisine("thai", 50).await;
        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].title, "a");
    }
}
