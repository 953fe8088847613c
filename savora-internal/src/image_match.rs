//! Assigns reference images to freshly generated recipes.

use std::cmp::Ordering;
use std::collections::HashSet;

use rand::seq::IndexedRandom;

use crate::corpus::{RecipeCorpus, RecipeCorpusEntry};
use crate::generator::RecipeDraft;
use crate::similarity::{title_similarity, word_similarity};

pub const DEFAULT_MIN_SCORE: f64 = 0.15;

/// Bound on each corpus query; keeps scoring cost flat as the corpus grows.
const POOL_LIMIT: usize = 50;

const INGREDIENT_WEIGHT: f64 = 0.7;
const TITLE_WEIGHT: f64 = 0.3;

#[derive(Clone)]
pub struct ImageMatcher {
    corpus: RecipeCorpus,
}

impl ImageMatcher {
    pub fn new(corpus: RecipeCorpus) -> Self {
        Self { corpus }
    }

    /// Best-fitting reference image for `recipe`, avoiding `exclude` where
    /// possible. Returns `None` only when the corpus has no image at all for
    /// any reachable pool.
    pub async fn match_image(
        &self,
        recipe: &RecipeDraft,
        exclude: &HashSet<String>,
        min_score: f64,
    ) -> Option<String> {
        let pool = self.candidate_pool(recipe).await;
        if pool.is_empty() {
            return None;
        }

        let ingredient_names = recipe.ingredient_names();
        let mut scored: Vec<(f64, &RecipeCorpusEntry, &str)> = pool
            .iter()
            .filter_map(|entry| {
                let url = entry.image_url.as_deref().filter(|u| !u.is_empty())?;
                let score = INGREDIENT_WEIGHT
                    * word_similarity(&ingredient_names, &entry.ingredient_names())
                    + TITLE_WEIGHT * title_similarity(&recipe.name, &entry.title);
                Some((score, entry, url))
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

        // Best entry above the threshold that hasn't been used yet
        let above: Vec<&(f64, &RecipeCorpusEntry, &str)> = scored
            .iter()
            .filter(|(score, _, _)| *score >= min_score)
            .collect();
        if let Some((_, _, url)) = above.iter().find(|(_, _, url)| !exclude.contains(*url)) {
            return Some((*url).to_string());
        }
        // Every scoring-eligible entry is excluded: a duplicate image beats
        // no image, so reuse the best one
        if let Some((_, _, url)) = above.first() {
            return Some((*url).to_string());
        }

        // Nothing scored high enough; fall back to unused entries, narrowest
        // match first
        let mut rng = rand::rng();
        let same_cuisine: Vec<&str> = scored
            .iter()
            .filter(|(_, entry, url)| {
                entry
                    .cuisine_type
                    .eq_ignore_ascii_case(&recipe.cuisine_type)
                    && !exclude.contains(*url)
            })
            .map(|(_, _, url)| *url)
            .collect();
        if let Some(url) = same_cuisine.choose(&mut rng) {
            return Some((*url).to_string());
        }

        let not_excluded: Vec<&str> = scored
            .iter()
            .filter(|(_, _, url)| !exclude.contains(*url))
            .map(|(_, _, url)| *url)
            .collect();
        if let Some(url) = not_excluded.choose(&mut rng) {
            return Some((*url).to_string());
        }

        let any: Vec<&str> = scored.iter().map(|(_, _, url)| *url).collect();
        any.choose(&mut rng).map(|url| (*url).to_string())
    }

    /// Assigns images across a whole batch.
    ///
    /// Diversity is a property of the batch, not of each call: the exclude
    /// set threads through sequentially, so this must not be parallelized
    /// across recipes.
    pub async fn match_images(&self, recipes: &[&RecipeDraft]) -> Vec<Option<String>> {
        let mut exclude = HashSet::new();
        let mut assigned = Vec::with_capacity(recipes.len());
        for recipe in recipes {
            let image = self
                .match_image(recipe, &exclude, DEFAULT_MIN_SCORE)
                .await;
            if let Some(url) = &image {
                exclude.insert(url.clone());
            }
            assigned.push(image);
        }
        assigned
    }

    /// Pool selection cascades through three broadening queries, stopping at
    /// the first non-empty result.
    async fn candidate_pool(&self, recipe: &RecipeDraft) -> Vec<RecipeCorpusEntry> {
        let pool = self
            .corpus
            .by_cuisine(&recipe.cuisine_type, POOL_LIMIT)
            .await;
        if !pool.is_empty() {
            return pool;
        }
        let pool = self
            .corpus
            .by_meal_type(&recipe.meal_type, POOL_LIMIT)
            .await;
        if !pool.is_empty() {
            return pool;
        }
        self.corpus.any(POOL_LIMIT).await
    }
}
