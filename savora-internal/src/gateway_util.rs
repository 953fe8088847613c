use std::sync::Arc;

use axum::extract::{rejection::JsonRejection, FromRequest, Json, Request};
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::instrument;

use crate::admission::AdmissionController;
use crate::config::Config;
use crate::corpus::RecipeCorpus;
use crate::dedup::DedupStore;
use crate::error::{Error, ErrorDetails};
use crate::generator::MealGeneratorProvider;
use crate::image_match::ImageMatcher;
use crate::store::StoreClient;
use crate::subscription::SubscriptionVerifier;

/// Environment variable holding the document store URL.
const STORE_URL_VAR: &str = "SAVORA_REDIS_URL";

/// State for the API
#[derive(Clone)]
pub struct AppStateData {
    pub config: Arc<Config>,
    pub http_client: Client,
    pub store: StoreClient,
    pub admission: Arc<AdmissionController>,
    pub generator: Arc<MealGeneratorProvider>,
    pub image_matcher: Arc<ImageMatcher>,
    pub dedup: Arc<DedupStore>,
    pub verifier: Arc<SubscriptionVerifier>,
}
pub type AppState = axum::extract::State<AppStateData>;

impl AppStateData {
    pub async fn new(config: Arc<Config>) -> Result<Self, Error> {
        let store_url = std::env::var(STORE_URL_VAR).map_err(|_| {
            Error::new(ErrorDetails::AppState {
                message: format!("Missing environment variable {STORE_URL_VAR}"),
            })
        })?;
        let store = StoreClient::new(&store_url).await?;
        Self::new_with_store(config, store)
    }

    /// Every component gets the store client injected here; nothing reaches
    /// for process-wide state, so tests can swap in `StoreClient::new_mock`.
    pub fn new_with_store(config: Arc<Config>, store: StoreClient) -> Result<Self, Error> {
        let http_client = setup_http_client()?;
        let admission = Arc::new(AdmissionController::new(
            store.clone(),
            &config.gateway.limits,
        ));
        let generator = Arc::new(MealGeneratorProvider::new(&config.generator));
        let image_matcher = Arc::new(ImageMatcher::new(RecipeCorpus::new(store.clone())));
        let dedup = Arc::new(DedupStore::new(store.clone()));
        let verifier = Arc::new(SubscriptionVerifier::new(
            store.clone(),
            &config.subscription,
        )?);
        Ok(Self {
            config,
            http_client,
            store,
            admission,
            generator,
            image_matcher,
            dedup,
            verifier,
        })
    }
}

/// A `Json` extractor that reports the path of the field that failed to
/// deserialize, instead of axum's terse default.
#[derive(Debug)]
pub struct StructuredJson<T>(pub T);

impl<S, T> FromRequest<S> for StructuredJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
    T: Send + Sync + DeserializeOwned,
{
    type Rejection = Error;

    #[instrument(skip_all, level = "trace", name = "StructuredJson::from_request")]
    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        // Retrieve the request body as Bytes before deserializing it
        let bytes = bytes::Bytes::from_request(req, state).await.map_err(|e| {
            Error::new(ErrorDetails::JsonRequest {
                message: format!("{} ({})", e, e.status()),
            })
        })?;

        // Convert the entire body into `serde_json::Value`
        let value = Json::<serde_json::Value>::from_bytes(&bytes)
            .map_err(|e| {
                Error::new(ErrorDetails::JsonRequest {
                    message: format!("{} ({})", e, e.status()),
                })
            })?
            .0;

        // Now use `serde_path_to_error::deserialize` to attempt deserialization into `T`
        let deserialized: T = serde_path_to_error::deserialize(&value).map_err(|e| {
            Error::new(ErrorDetails::JsonRequest {
                message: e.to_string(),
            })
        })?;

        Ok(StructuredJson(deserialized))
    }
}

// Set high enough that the per-request generation timeout is the one that
// actually fires.
pub const DEFAULT_HTTP_CLIENT_TIMEOUT: std::time::Duration =
    std::time::Duration::from_secs(20 * 60);

pub fn setup_http_client() -> Result<Client, Error> {
    Client::builder()
        .timeout(DEFAULT_HTTP_CLIENT_TIMEOUT)
        .build()
        .map_err(|e| {
            Error::new(ErrorDetails::AppState {
                message: format!("Failed to build HTTP client: {e}"),
            })
        })
}
