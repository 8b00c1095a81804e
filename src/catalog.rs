use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

use crate::config::Epic;
use crate::model::CatalogEntry;

/// Anything that can produce the current catalog. Implementations never fail;
/// an unavailable catalog is an empty one.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch(&self) -> Vec<CatalogEntry>;
}

#[derive(Clone)]
pub struct CatalogClient {
    http: Client,
    api_url: Url,
    referer: String,
    locale: String,
    country: String,
    retry_count: u32,
    retry_delay: Duration,
}

impl fmt::Debug for CatalogClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogClient")
            .field("api_url", &self.api_url)
            .field("retry_count", &self.retry_count)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    data: SearchData,
}

#[derive(Deserialize)]
struct SearchData {
    #[serde(rename = "Catalog")]
    catalog: Catalog,
}

#[derive(Deserialize)]
struct Catalog {
    #[serde(rename = "searchStore")]
    search_store: SearchStore,
}

#[derive(Deserialize)]
struct SearchStore {
    elements: Vec<Value>,
}

impl CatalogClient {
    pub fn from_config(cfg: &Epic) -> Result<Self> {
        let api_url = Url::parse(&cfg.api_url)
            .with_context(|| format!("invalid catalog URL: {}", cfg.api_url))?;
        let http = Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(cfg.timeout()?)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            api_url,
            referer: cfg.referer.clone(),
            locale: cfg.locale.clone(),
            country: cfg.country.clone(),
            retry_count: cfg.api_retry_count,
            retry_delay: cfg.retry_delay()?,
        })
    }

    pub fn build_request(&self) -> Result<reqwest::Request> {
        self.http
            .get(self.api_url.clone())
            .query(&[
                ("locale", self.locale.as_str()),
                ("country", self.country.as_str()),
                ("allowCountries", self.country.as_str()),
            ])
            .header("Referer", &self.referer)
            .header("Content-Type", "application/json; charset=utf-8")
            .build()
            .context("failed to build catalog request")
    }

    async fn fetch_once(&self) -> Result<Vec<CatalogEntry>> {
        let request = self.build_request()?;
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach catalog endpoint")?
            .error_for_status()
            .context("catalog endpoint returned an error status")?;
        let body = res.text().await.context("failed to read catalog response")?;
        let payload: SearchResponse =
            serde_json::from_str(&body).context("unexpected catalog response shape")?;
        Ok(decode_elements(payload.data.catalog.search_store.elements))
    }

    /// Fetch with up to `retry_count + 1` attempts, sleeping `retry_delay`
    /// between them. Exhausted retries degrade to an empty catalog.
    #[instrument(skip_all)]
    pub async fn fetch(&self) -> Vec<CatalogEntry> {
        let attempts = self.retry_count + 1;
        for attempt in 1..=attempts {
            match self.fetch_once().await {
                Ok(entries) => {
                    debug!(attempt, entries = entries.len(), "catalog fetched");
                    return entries;
                }
                Err(err) if attempt < attempts => {
                    warn!(
                        ?err,
                        attempt,
                        attempts,
                        delay_ms = self.retry_delay.as_millis() as u64,
                        "catalog request failed; retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(err) => {
                    error!(?err, attempts, "catalog request failed; giving up");
                }
            }
        }
        Vec::new()
    }
}

#[async_trait]
impl CatalogSource for CatalogClient {
    async fn fetch(&self) -> Vec<CatalogEntry> {
        CatalogClient::fetch(self).await
    }
}

/// Decode elements one by one. Mismatched fields decode as absent; an element
/// that is not an object at all is kept as an empty entry so it is skipped
/// during classification instead of shrinking the catalog.
fn decode_elements(elements: Vec<Value>) -> Vec<CatalogEntry> {
    elements
        .into_iter()
        .enumerate()
        .map(|(idx, raw)| {
            serde_json::from_value::<CatalogEntry>(raw).unwrap_or_else(|err| {
                warn!(idx, %err, "malformed catalog element");
                CatalogEntry::default()
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(base_url: &str, retry_count: u32) -> CatalogClient {
        let cfg = Epic {
            api_url: format!("{}/freeGamesPromotions", base_url),
            api_retry_count: retry_count,
            api_retry_delay: 0.0,
            api_timeout: 5.0,
            ..Epic::default()
        };
        CatalogClient::from_config(&cfg).unwrap()
    }

    #[test]
    fn oversized_timeout_is_rejected_not_panicking() {
        let cfg = Epic {
            api_timeout: 1e30,
            ..Epic::default()
        };
        let err = CatalogClient::from_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("api_timeout"), "got: {err}");
    }

    fn catalog_body(elements: Value) -> Value {
        json!({ "data": { "Catalog": { "searchStore": { "elements": elements } } } })
    }

    #[test]
    fn build_request_sets_query_and_headers() {
        let client = CatalogClient::from_config(&Epic::default()).unwrap();
        let request = client.build_request().unwrap();
        assert_eq!(request.method(), reqwest::Method::GET);
        assert_eq!(request.url().path(), "/freeGamesPromotions");
        let query: Vec<(String, String)> = request
            .url()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            query,
            vec![
                ("locale".to_string(), "zh-CN".to_string()),
                ("country".to_string(), "CN".to_string()),
                ("allowCountries".to_string(), "CN".to_string()),
            ]
        );
        let headers = request.headers();
        assert_eq!(
            headers.get("Referer").and_then(|h| h.to_str().ok()).unwrap(),
            "https://www.epicgames.com/store/zh-CN/"
        );
        assert_eq!(
            headers
                .get("Content-Type")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "application/json; charset=utf-8"
        );
    }

    #[tokio::test]
    async fn fetch_returns_elements() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/freeGamesPromotions"))
            .and(query_param("locale", "zh-CN"))
            .and(query_param("allowCountries", "CN"))
            .and(header("Referer", "https://www.epicgames.com/store/zh-CN/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(catalog_body(json!([
                { "title": "A" },
                { "title": "B", "url": "https://example.com/b" }
            ]))))
            .expect(1)
            .mount(&server)
            .await;

        let entries = test_client(&server.uri(), 3).fetch().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title.as_deref(), Some("A"));
        assert_eq!(entries[1].url.as_deref(), Some("https://example.com/b"));
    }

    #[tokio::test]
    async fn fetch_retries_after_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(catalog_body(json!([{ "title": "A" }]))),
            )
            .mount(&server)
            .await;

        let entries = test_client(&server.uri(), 1).fetch().await;
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn fetch_gives_up_after_retry_count_plus_one_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "errors": ["nope"] })))
            .expect(3)
            .mount(&server)
            .await;

        let entries = test_client(&server.uri(), 2).fetch().await;
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn non_json_body_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .expect(1)
            .mount(&server)
            .await;

        assert!(test_client(&server.uri(), 0).fetch().await.is_empty());
    }

    #[test]
    fn malformed_elements_keep_their_place() {
        let entries = decode_elements(vec![
            json!({ "title": "Good" }),
            json!({ "title": "Odd", "promotions": "not an object", "seller": "Epic Games" }),
            json!("not an element"),
            json!({ "title": "Also good", "customAttributes": [] }),
        ]);
        assert_eq!(entries.len(), 4);
        let titles: Vec<_> = entries.iter().filter_map(|e| e.title.as_deref()).collect();
        assert_eq!(titles, vec!["Good", "Odd", "Also good"]);
        assert!(entries[1].promotions.is_none());
        assert!(entries[1].seller.is_none());
        assert_eq!(entries[2], CatalogEntry::default());
    }

    #[tokio::test]
    async fn mismatched_fields_do_not_empty_the_catalog() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(catalog_body(json!([
                { "title": "Soon", "seller": "Epic Games", "promotions": { "promotionalOffers": 1 } }
            ]))))
            .expect(1)
            .mount(&server)
            .await;

        let entries = test_client(&server.uri(), 2).fetch().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title.as_deref(), Some("Soon"));
    }
}
