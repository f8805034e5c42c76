//! # Remote Source Client
//!
//! Issues authenticated form POSTs against the partner listing API and
//! classifies every outcome into [`FetchError`].
//!
//! ## Request Shape
//!
//! Each call posts `username`, `password`, `action` and `args`, where `args`
//! is the JSON encoding of the operation arguments. Responses are JSON
//! documents carrying a `REQUESTSTATUS` block and one collection.
//!
//! The client never caches; [`crate::remote::CachedSource`] layers the page
//! cache on top of [`RemoteSourceClient::fetch_raw`] and [`parse_response`].

use crate::error::FetchError;
use crate::remote::types::{RemoteRecord, ResponseEnvelope};
use bridge_traits::http::{HttpClient, HttpRequest, RetryPolicy};
use bytes::Bytes;
use chrono::NaiveDate;
use core_runtime::SyncConfig;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

// ============================================================================
// Queries
// ============================================================================

/// Operations supported by the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteQuery {
    /// One page of all listings, ordered by id
    ListingsPage { page: u32, page_size: u32 },
    /// Listings changed since a date
    ChangedSince(NaiveDate),
    /// Listings invalidated since a date
    InvalidSince(NaiveDate),
    /// A single listing, hydrated with its media
    Listing(i64),
}

impl RemoteQuery {
    /// Wire name of the operation
    pub fn action(&self) -> &'static str {
        match self {
            RemoteQuery::ListingsPage { .. } => "getListings",
            RemoteQuery::ChangedSince(_) => "getChangedListings",
            RemoteQuery::InvalidSince(_) => "getInvalidListings",
            RemoteQuery::Listing(_) => "getListing",
        }
    }

    /// Operation arguments, before JSON encoding
    pub fn args(&self) -> Value {
        match self {
            RemoteQuery::ListingsPage { page, page_size } => json!({
                "pagenum": page,
                "pagesize": page_size,
                "filtergroup": {
                    "ANDOR": "AND",
                    "FILTERS": [{
                        "FIELDCATEGORY": "Listing",
                        "FIELDNAME": "Listingid",
                        "FILTERTYPE": "GREATER THAN",
                        "FILTERVALUE": 0
                    }]
                },
                "displayamenities": 1
            }),
            RemoteQuery::ChangedSince(since) | RemoteQuery::InvalidSince(since) => json!({
                "lastSync": since.format("%Y-%m-%d").to_string()
            }),
            RemoteQuery::Listing(id) => json!({ "LISTINGID": id }),
        }
    }
}

/// Records of a successful response, plus the source-reported total
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourcePage {
    pub total: u64,
    pub records: Vec<RemoteRecord>,
}

// ============================================================================
// Client
// ============================================================================

/// Authenticated client of the partner listing API
pub struct RemoteSourceClient {
    http: Arc<dyn HttpClient>,
    api_url: String,
    username: String,
    password: String,
    timeout: Duration,
    retry_policy: RetryPolicy,
}

impl RemoteSourceClient {
    pub fn new(
        http: Arc<dyn HttpClient>,
        api_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            api_url: api_url.into(),
            username: username.into(),
            password: password.into(),
            timeout,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Build a client from validated configuration and a resolved password
    pub fn from_config(
        http: Arc<dyn HttpClient>,
        config: &SyncConfig,
        password: impl Into<String>,
    ) -> Self {
        Self::new(
            http,
            config.api_url.clone(),
            config.api_username.clone(),
            password,
            config.request_timeout,
        )
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Issue `query` and return the raw response body
    ///
    /// Only transport-level failures are detected here: network errors,
    /// non-200 statuses and empty bodies.
    #[instrument(skip(self), fields(action = query.action()))]
    pub async fn fetch_raw(&self, query: &RemoteQuery) -> Result<Bytes, FetchError> {
        let args = serde_json::to_string(&query.args())
            .map_err(|e| FetchError::Transport(format!("Argument encoding failed: {}", e)))?;
        let fields = [
            ("username", self.username.as_str()),
            ("password", self.password.as_str()),
            ("action", query.action()),
            ("args", args.as_str()),
        ];

        let request = HttpRequest::post(self.api_url.as_str())
            .form(&fields)
            .map_err(|e| FetchError::Transport(e.to_string()))?
            .timeout(self.timeout);

        let response = self
            .http
            .execute_with_retry(request, self.retry_policy.clone())
            .await
            .map_err(|e| {
                warn!(error = %e, "Remote request failed");
                FetchError::Transport(e.to_string())
            })?;

        if response.status != 200 {
            return Err(FetchError::Transport(format!(
                "HTTP status {}",
                response.status
            )));
        }
        if response.body.is_empty() {
            return Err(FetchError::Transport("empty response body".to_string()));
        }

        debug!(bytes = response.body.len(), "Remote response received");
        Ok(response.body)
    }

    /// Fetch and classify `query` without consulting any cache
    pub async fn fetch(&self, query: &RemoteQuery) -> Result<SourcePage, FetchError> {
        let raw = self.fetch_raw(query).await?;
        parse_response(query, &raw)
    }
}

// ============================================================================
// Classification
// ============================================================================

/// Decode and classify a raw response body for `query`
///
/// # Errors
///
/// - [`FetchError::Decode`] when the body is not a response document
/// - [`FetchError::SourceReported`] when the source flags errors
/// - [`FetchError::Empty`] when the source reports no results
pub fn parse_response(query: &RemoteQuery, raw: &[u8]) -> Result<SourcePage, FetchError> {
    let envelope: ResponseEnvelope =
        serde_json::from_slice(raw).map_err(|e| FetchError::Decode(e.to_string()))?;
    let status = &envelope.request_status;

    if status.has_errors {
        let message = if status.errors.is_empty() {
            "unspecified error".to_string()
        } else {
            status
                .errors
                .iter()
                .map(|e| e.describe())
                .collect::<Vec<_>>()
                .join("; ")
        };
        return Err(FetchError::SourceReported(message));
    }

    let records = match query {
        RemoteQuery::ListingsPage { .. } => envelope.listings,
        RemoteQuery::ChangedSince(_) => envelope.changed_listings,
        RemoteQuery::InvalidSince(_) => envelope.invalid_listings,
        RemoteQuery::Listing(_) => envelope.listing.into_iter().collect(),
    };

    // A single-listing response carries no result count of its own
    let total = match query {
        RemoteQuery::Listing(_) => records.len() as u64,
        _ => status.results,
    };

    if total == 0 || records.is_empty() {
        return Err(FetchError::Empty);
    }

    Ok(SourcePage { total, records })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::{BridgeError, Result};
    use bridge_traits::http::{HttpMethod, HttpResponse};
    use mockall::mock;

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
        }
    }

    fn client(http: MockHttpClient) -> RemoteSourceClient {
        RemoteSourceClient::new(
            Arc::new(http),
            "https://partner.example.com/api",
            "partner",
            "secret",
            Duration::from_secs(5),
        )
        .with_retry_policy(RetryPolicy::no_retry())
    }

    fn page_query() -> RemoteQuery {
        RemoteQuery::ListingsPage {
            page: 2,
            page_size: 25,
        }
    }

    #[test]
    fn test_query_arguments() {
        let args = page_query().args();
        assert_eq!(args["pagenum"], 2);
        assert_eq!(args["pagesize"], 25);
        assert_eq!(args["filtergroup"]["FILTERS"][0]["FILTERTYPE"], "GREATER THAN");

        let since = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(
            RemoteQuery::ChangedSince(since).args()["lastSync"],
            "2024-03-01"
        );
        assert_eq!(RemoteQuery::InvalidSince(since).action(), "getInvalidListings");
        assert_eq!(RemoteQuery::Listing(9).args()["LISTINGID"], 9);
    }

    #[tokio::test]
    async fn test_request_is_authenticated_form_post() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .withf(|request| {
                let body = request
                    .body
                    .as_ref()
                    .map(|b| String::from_utf8_lossy(b).to_string())
                    .unwrap_or_default();
                request.method == HttpMethod::Post
                    && request.url == "https://partner.example.com/api"
                    && body.contains("username=partner")
                    && body.contains("password=secret")
                    && body.contains("action=getListings")
                    && body.contains("args=")
                    && request.timeout == Some(Duration::from_secs(5))
            })
            .times(1)
            .returning(|_| {
                Ok(HttpResponse::new(
                    200,
                    r#"{"REQUESTSTATUS":{"HASERRORS":0,"RESULTS":3},
                        "LISTINGS":{"LISTING":[{"LISTINGID":1},{"LISTINGID":2}]}}"#,
                ))
            });

        let page = client(http).fetch(&page_query()).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.records.len(), 2);
    }

    #[tokio::test]
    async fn test_transport_failures() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .times(1)
            .returning(|_| Err(BridgeError::Timeout("slow".to_string())));
        let err = client(http).fetch(&page_query()).await.unwrap_err();
        assert!(matches!(err, FetchError::Transport(_)));
        assert!(err.is_retryable());

        let mut http = MockHttpClient::new();
        http.expect_execute()
            .times(1)
            .returning(|_| Ok(HttpResponse::new(503, "unavailable")));
        let err = client(http).fetch(&page_query()).await.unwrap_err();
        assert_eq!(err, FetchError::Transport("HTTP status 503".to_string()));

        let mut http = MockHttpClient::new();
        http.expect_execute()
            .times(1)
            .returning(|_| Ok(HttpResponse::new(200, "")));
        let err = client(http).fetch(&page_query()).await.unwrap_err();
        assert!(matches!(err, FetchError::Transport(_)));
    }

    #[test]
    fn test_classification() {
        let reported = br#"{"REQUESTSTATUS":{"HASERRORS":1,"RESULTS":0,
            "ERRORS":{"ITEM":[{"MESSAGE":"Invalid login","DETAIL":"check password"},{"MESSAGE":"Denied"}]}}}"#;
        assert_eq!(
            parse_response(&page_query(), reported).unwrap_err(),
            FetchError::SourceReported("Invalid login: check password; Denied".to_string())
        );

        let empty = br#"{"REQUESTSTATUS":{"HASERRORS":0,"RESULTS":0}}"#;
        assert_eq!(
            parse_response(&page_query(), empty).unwrap_err(),
            FetchError::Empty
        );

        let garbage = b"<html>maintenance</html>";
        assert!(matches!(
            parse_response(&page_query(), garbage).unwrap_err(),
            FetchError::Decode(_)
        ));
    }

    #[test]
    fn test_single_listing_response() {
        let raw = br#"{"REQUESTSTATUS":{"HASERRORS":0},
            "LISTING":{"LISTINGID":42,"COMPANY":"Harbor Inn",
                       "IMAGES":{"ITEM":{"MEDIAFILE":"harbor.jpg"}}}}"#;
        let page = parse_response(&RemoteQuery::Listing(42), raw).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.records[0].listing_id, Some(42));
        assert_eq!(page.records[0].images.as_ref().map(Vec::len), Some(1));

        let missing = br#"{"REQUESTSTATUS":{"HASERRORS":0},"LISTING":{}}"#;
        assert_eq!(
            parse_response(&RemoteQuery::Listing(42), missing).unwrap_err(),
            FetchError::Empty
        );
    }
}
