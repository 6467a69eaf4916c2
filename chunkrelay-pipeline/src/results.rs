use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chunkrelay_core::RunId;
use reqwest::{Client, StatusCode, Url};
use serde::Serialize;
use serde_json::Value;

use crate::engine::{base_url, join_segments};
use crate::{AccessToken, PipelineError, PipelineResult, TokenProvider};

/// Default and upper bound for `itemsPerPage`
pub const DEFAULT_MAX_ITEMS_PER_PAGE: u32 = 100;

/// Which side of a run's output to read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCollection {
    /// Rows the pipeline imported
    Accepted,
    /// Rows the pipeline rejected
    Rejected,
}

impl ResultCollection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }
}

/// 1-based page of a run's results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub items_per_page: u32,
}

impl PageRequest {
    pub fn new(page: u32, items_per_page: u32) -> Self {
        Self {
            page,
            items_per_page,
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.items_per_page)
    }

    pub fn limit(&self) -> u32 {
        self.items_per_page
    }
}

/// One page of accepted and rejected records
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResultPage {
    pub items: Vec<Value>,
    pub errors: Vec<Value>,
}

/// Read access to pipeline output. Implementations must apply `offset` and
/// `limit` themselves; callers never receive an unbounded listing.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn query(
        &self,
        token: &AccessToken,
        run_id: &RunId,
        collection: ResultCollection,
        offset: u64,
        limit: u32,
    ) -> PipelineResult<Vec<Value>>;
}

/// Pages through the accepted and rejected records of a run
#[derive(Clone)]
pub struct ResultFetcher {
    store: Arc<dyn ResultStore>,
    tokens: Arc<dyn TokenProvider>,
    max_items_per_page: u32,
}

impl ResultFetcher {
    pub fn new(store: Arc<dyn ResultStore>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            store,
            tokens,
            max_items_per_page: DEFAULT_MAX_ITEMS_PER_PAGE,
        }
    }

    pub fn with_max_items_per_page(mut self, max: u32) -> Self {
        self.max_items_per_page = max;
        self
    }

    pub fn max_items_per_page(&self) -> u32 {
        self.max_items_per_page
    }

    pub fn validate(&self, request: &PageRequest) -> PipelineResult<()> {
        if request.page == 0 {
            return Err(PipelineError::invalid("page must be at least 1"));
        }
        if request.items_per_page == 0 || request.items_per_page > self.max_items_per_page {
            return Err(PipelineError::invalid(format!(
                "itemsPerPage must be 1-{} (got {})",
                self.max_items_per_page, request.items_per_page
            )));
        }
        Ok(())
    }

    pub async fn fetch(&self, run_id: &RunId, request: PageRequest) -> PipelineResult<ResultPage> {
        self.validate(&request)?;
        let token = self.tokens.token().await?;

        let (offset, limit) = (request.offset(), request.limit());
        let (mut items, mut errors) = futures::try_join!(
            self.store
                .query(&token, run_id, ResultCollection::Accepted, offset, limit),
            self.store
                .query(&token, run_id, ResultCollection::Rejected, offset, limit),
        )?;
        items.truncate(limit as usize);
        errors.truncate(limit as usize);

        tracing::debug!(
            run_id = %run_id,
            page = request.page,
            items = items.len(),
            errors = errors.len(),
            "result page fetched"
        );
        Ok(ResultPage { items, errors })
    }
}

/// Settings for [`HttpResultStore`]
#[derive(Debug, Clone)]
pub struct HttpResultConfig {
    pub base_url: String,
    pub timeout: Duration,
}

/// Result store behind a REST API:
/// `GET {base}/runs/{runId}/{accepted|rejected}?offset=&limit=` returning a JSON array.
pub struct HttpResultStore {
    client: Client,
    base: Url,
}

impl HttpResultStore {
    pub fn new(config: HttpResultConfig) -> PipelineResult<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            base: base_url(&config.base_url)?,
        })
    }
}

#[async_trait]
impl ResultStore for HttpResultStore {
    async fn query(
        &self,
        token: &AccessToken,
        run_id: &RunId,
        collection: ResultCollection,
        offset: u64,
        limit: u32,
    ) -> PipelineResult<Vec<Value>> {
        let url = join_segments(&self.base, &["runs", run_id.as_str(), collection.as_str()])?;
        let response = self
            .client
            .get(url)
            .bearer_auth(token.secret())
            .query(&[("offset", offset.to_string()), ("limit", limit.to_string())])
            .send()
            .await
            .map_err(|e| PipelineError::unavailable(format!("result query failed: {e}")))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(PipelineError::run_not_found(run_id.as_str())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(PipelineError::credential(
                "result store refused the service credential",
            )),
            status if !status.is_success() => Err(PipelineError::unavailable(format!(
                "result store returned {status}"
            ))),
            _ => response
                .json::<Vec<Value>>()
                .await
                .map_err(|e| PipelineError::decode(format!("result page: {e}"))),
        }
    }
}
