//! Source record extraction.
//!
//! The source of truth (the knowledge-base reporting view) is reached through
//! a query endpoint that answers `POST {"kind", "query", "limit"}` with
//! `{"rows": [...]}`. Rows come back raw: this crate normalizes article
//! bodies/summaries to plain text and fills in missing article links, and
//! otherwise passes data through untouched. No retries happen here.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use url::Url;

use kbmirror_shared::{ArticleRecord, KbMirrorError, Result, SourceConfig, TicketRow};

/// Maximum number of redirects to follow when querying the source.
const MAX_REDIRECTS: usize = 3;

/// User-Agent string for source requests.
const USER_AGENT: &str = concat!("kbmirror/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// RecordSource
// ---------------------------------------------------------------------------

/// Anything that can answer article and ticket queries.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetch the current article rows for `query`.
    async fn fetch_articles(&self, query: &str) -> Result<Vec<ArticleRecord>>;

    /// Fetch at most `limit` ticket rows for `query`.
    async fn fetch_tickets(&self, query: &str, limit: usize) -> Result<Vec<TicketRow>>;
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
enum QueryKind {
    Articles,
    Tickets,
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    kind: QueryKind,
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse<T> {
    rows: Vec<T>,
}

// ---------------------------------------------------------------------------
// HttpRecordSource
// ---------------------------------------------------------------------------

/// [`RecordSource`] backed by the HTTP query endpoint.
pub struct HttpRecordSource {
    client: Client,
    endpoint: Url,
    token: Option<String>,
    article_url_template: String,
}

impl HttpRecordSource {
    /// Build a client from the `[source]` config section. The bearer token is
    /// read from the configured env var when present.
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let token = std::env::var(&config.token_env).ok().filter(|t| !t.is_empty());
        Self::build(config, token)
    }

    /// Like [`HttpRecordSource::new`] with an explicit bearer token.
    pub fn with_token(config: &SourceConfig, token: impl Into<String>) -> Result<Self> {
        Self::build(config, Some(token.into()))
    }

    fn build(config: &SourceConfig, token: Option<String>) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            KbMirrorError::config(format!("invalid source.endpoint '{}': {e}", config.endpoint))
        })?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| KbMirrorError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            token,
            article_url_template: config.article_url_template.clone(),
        })
    }

    async fn query<T: for<'de> Deserialize<'de>>(&self, request: &QueryRequest<'_>) -> Result<Vec<T>> {
        let mut builder = self.client.post(self.endpoint.as_str()).json(request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| KbMirrorError::Network(format!("{}: {e}", self.endpoint)))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(KbMirrorError::Remote {
                status: status.as_u16(),
                message,
            });
        }

        let body: QueryResponse<T> = response.json().await.map_err(|e| {
            KbMirrorError::parse(format!("{}: malformed query response: {e}", self.endpoint))
        })?;

        debug!(rows = body.rows.len(), "query answered");
        Ok(body.rows)
    }
}

#[async_trait]
impl RecordSource for HttpRecordSource {
    #[instrument(skip_all, fields(endpoint = %self.endpoint))]
    async fn fetch_articles(&self, query: &str) -> Result<Vec<ArticleRecord>> {
        let request = QueryRequest {
            kind: QueryKind::Articles,
            query,
            limit: None,
        };
        let rows: Vec<ArticleRecord> = self.query(&request).await?;
        let rows: Vec<ArticleRecord> = rows
            .into_iter()
            .map(|row| normalize_article(row, &self.article_url_template))
            .collect();

        info!(count = rows.len(), "fetched article rows");
        Ok(rows)
    }

    #[instrument(skip_all, fields(endpoint = %self.endpoint, limit = limit))]
    async fn fetch_tickets(&self, query: &str, limit: usize) -> Result<Vec<TicketRow>> {
        let request = QueryRequest {
            kind: QueryKind::Tickets,
            query,
            limit: Some(limit),
        };
        let mut rows: Vec<TicketRow> = self.query(&request).await?;
        rows.truncate(limit);

        info!(count = rows.len(), "fetched ticket rows");
        Ok(rows)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Strip markup from body/summary and fill the link from `url_template`
/// when the row has none.
pub fn normalize_article(mut row: ArticleRecord, url_template: &str) -> ArticleRecord {
    row.body = kbmirror_text::clean_html(&row.body);
    row.summary = kbmirror_text::clean_html(&row.summary);
    if row.url.trim().is_empty() {
        row.url = article_url(url_template, row.article_id.as_str());
    }
    row
}

/// Render an article link from a template containing `{id}`.
pub fn article_url(template: &str, article_id: &str) -> String {
    template.replace("{id}", article_id)
}
