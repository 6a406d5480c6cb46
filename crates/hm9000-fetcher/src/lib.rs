//! Desired-state bulk fetcher: polls the cloud controller's bulk API,
//! paginating by `bulk_token`, and diff-syncs the result into the store.
//! See spec §6 "Desired-state fetch".

#![forbid(unsafe_code)]

pub mod error;

pub use error::{FetchError, FetchResult};

use std::collections::HashMap;
use std::time::Duration;

use hm9000_proto::{AppKey, AppState, DesiredApp, PackageState};
use hm9000_store::{FreshnessGate, JsonKvStore, StoreView};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub cc_base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub batch_size: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BulkToken {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    results: HashMap<String, DesiredApp>,
    bulk_token: BulkToken,
}

pub struct Fetcher {
    config: FetcherConfig,
    client: reqwest::Client,
}

impl Fetcher {
    pub fn new(config: FetcherConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("failed to build HTTP client");
        Self { config, client }
    }

    /// Paginate through the full bulk API, diff-syncing every `STARTED`
    /// non-`FAILED` app into the store, then bump desired freshness.
    /// Returns the number of apps stored.
    pub async fn fetch_all(&self, store: &JsonKvStore, freshness: &FreshnessGate<'_>, now: i64) -> FetchResult<usize> {
        let view = StoreView::new(store);
        let mut merged: HashMap<AppKey, DesiredApp> = HashMap::new();
        let mut token = BulkToken::default();

        loop {
            let page = self.fetch_page(token).await?;
            if page.results.is_empty() {
                break;
            }
            for app in page.results.into_values() {
                if app.state == AppState::Started && app.package_state != PackageState::Failed {
                    merged.insert(app.app_key(), app);
                }
            }
            token = page.bulk_token;
        }

        let count = merged.len();
        view.save_desired_apps(&merged, now)?;
        freshness.bump_desired(now)?;
        info!(apps = count, "desired-state bulk fetch complete");
        Ok(count)
    }

    async fn fetch_page(&self, token: BulkToken) -> FetchResult<BulkResponse> {
        let token_json = serde_json::to_string(&token)?;
        let url = format!("{}/bulk/apps", self.config.cc_base_url);

        let mut request = self
            .client
            .get(&url)
            .query(&[("batch_size", self.config.batch_size.to_string()), ("bulk_token", token_json)]);
        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            request = request.basic_auth(user, Some(pass));
        }

        let response = request.send().await.map_err(|e| FetchError::NetworkError(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED || response.status() == reqwest::StatusCode::FORBIDDEN {
            return Err(FetchError::AuthFailed(response.status().to_string()));
        }
        if !response.status().is_success() {
            return Err(FetchError::Non200(response.status().as_u16()));
        }

        response.json().await.map_err(|e| FetchError::BadPayload(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hm9000_proto::{AppState as ProtoAppState, PackageState as ProtoPackageState};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn app(guid: &str, state: ProtoAppState, package_state: ProtoPackageState) -> DesiredApp {
        DesiredApp {
            app_guid: guid.into(),
            app_version: "v1".into(),
            instance_count: 1,
            memory: 256,
            state,
            package_state,
        }
    }

    fn config(base_url: &str) -> FetcherConfig {
        FetcherConfig {
            cc_base_url: base_url.to_string(),
            username: Some("hm9000".into()),
            password: Some("secret".into()),
            batch_size: 50,
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn paginates_until_results_are_empty_and_diff_syncs() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/bulk/apps"))
            .respond_with(move |req: &wiremock::Request| {
                let query: HashMap<String, String> = req.url.query_pairs().into_owned().collect();
                let token: BulkToken = serde_json::from_str(&query["bulk_token"]).unwrap();
                if token.id == 0 {
                    ResponseTemplate::new(200).set_body_json(json!({
                        "results": { "a": app("a", ProtoAppState::Started, ProtoPackageState::Staged) },
                        "bulk_token": { "id": 1 }
                    }))
                } else {
                    ResponseTemplate::new(200).set_body_json(json!({ "results": {}, "bulk_token": { "id": 1 } }))
                }
            })
            .mount(&server)
            .await;

        let store = JsonKvStore::in_memory();
        let gate = FreshnessGate::new(&store, 600, 10);
        let fetcher = Fetcher::new(config(&server.uri()));
        let count = fetcher.fetch_all(&store, &gate, 1000).await.unwrap();
        assert_eq!(count, 1);

        let view = StoreView::new(&store);
        let apps = view.get_desired_apps(1000).unwrap();
        assert!(apps.contains_key(&AppKey::new("a", "v1")));
    }

    #[tokio::test]
    async fn drops_stopped_and_failed_apps() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bulk/apps"))
            .respond_with(move |req: &wiremock::Request| {
                let query: HashMap<String, String> = req.url.query_pairs().into_owned().collect();
                let token: BulkToken = serde_json::from_str(&query["bulk_token"]).unwrap();
                if token.id == 0 {
                    ResponseTemplate::new(200).set_body_json(json!({
                        "results": {
                            "stopped": app("stopped", ProtoAppState::Stopped, ProtoPackageState::Staged),
                            "failed": app("failed", ProtoAppState::Started, ProtoPackageState::Failed),
                        },
                        "bulk_token": { "id": 1 }
                    }))
                } else {
                    ResponseTemplate::new(200).set_body_json(json!({ "results": {}, "bulk_token": { "id": 1 } }))
                }
            })
            .mount(&server)
            .await;

        let store = JsonKvStore::in_memory();
        let gate = FreshnessGate::new(&store, 600, 10);
        let count = Fetcher::new(config(&server.uri())).fetch_all(&store, &gate, 1000).await.unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn unauthorized_response_surfaces_as_auth_failed() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/bulk/apps")).respond_with(ResponseTemplate::new(401)).mount(&server).await;

        let store = JsonKvStore::in_memory();
        let gate = FreshnessGate::new(&store, 600, 10);
        let result = Fetcher::new(config(&server.uri())).fetch_all(&store, &gate, 1000).await;
        assert!(matches!(result, Err(FetchError::AuthFailed(_))));
    }

    #[tokio::test]
    async fn server_error_surfaces_as_non200() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/bulk/apps")).respond_with(ResponseTemplate::new(500)).mount(&server).await;

        let store = JsonKvStore::in_memory();
        let gate = FreshnessGate::new(&store, 600, 10);
        let result = Fetcher::new(config(&server.uri())).fetch_all(&store, &gate, 1000).await;
        assert!(matches!(result, Err(FetchError::Non200(500))));
    }
}
