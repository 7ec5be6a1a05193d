use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header::COOKIE, Client, RequestBuilder};
use serde::Serialize;
use serde_json::Value;
use shared::{domain::CanonicalId, protocol::HistoryRecord};
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupHistoryQuery {
    pub before_id: Option<String>,
    pub limit: Option<u32>,
}

/// Paginated history endpoints. Pages come back oldest-first.
#[async_trait]
pub trait HistoryApi: Send + Sync {
    async fn direct_history(
        &self,
        counterparty: &CanonicalId,
        offset: usize,
    ) -> Result<Vec<HistoryRecord>>;

    async fn group_history(
        &self,
        group_id: &CanonicalId,
        query: GroupHistoryQuery,
    ) -> Result<Vec<HistoryRecord>>;
}

#[derive(Serialize)]
struct DirectHistoryQuery<'a> {
    user_id: &'a str,
    offset: usize,
}

#[derive(Serialize)]
struct GroupMessagesQuery<'a> {
    group_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    before_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u32>,
}

pub struct HttpHistoryClient {
    http: Client,
    server_url: String,
    session_cookie: Option<String>,
}

impl HttpHistoryClient {
    pub fn new(server_url: impl Into<String>, session_cookie: Option<String>) -> Self {
        Self::with_client(Client::new(), server_url, session_cookie)
    }

    pub fn with_client(
        http: Client,
        server_url: impl Into<String>,
        session_cookie: Option<String>,
    ) -> Self {
        let server_url: String = server_url.into();
        Self {
            http,
            server_url: server_url.trim_end_matches('/').to_string(),
            session_cookie,
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.session_cookie {
            Some(cookie) => request.header(COOKIE, cookie),
            None => request,
        }
    }

    async fn fetch_page(&self, request: RequestBuilder, what: &str) -> Result<Vec<HistoryRecord>> {
        let body: Value = self
            .authorized(request)
            .send()
            .await
            .with_context(|| format!("failed to request {what}"))?
            .error_for_status()
            .with_context(|| format!("server rejected {what} request"))?
            .json()
            .await
            .with_context(|| format!("{what} response is not JSON"))?;
        page_from_body(body, what)
    }
}

/// `null` and non-array bodies are empty pages; the server encodes an empty
/// result set as `null`.
fn page_from_body(body: Value, what: &str) -> Result<Vec<HistoryRecord>> {
    match body {
        Value::Array(_) => serde_json::from_value(body)
            .with_context(|| format!("{what} response has malformed records")),
        Value::Null => Ok(Vec::new()),
        other => {
            warn!(what, body = %other, "history: expected an array, treating as empty");
            Ok(Vec::new())
        }
    }
}

#[async_trait]
impl HistoryApi for HttpHistoryClient {
    async fn direct_history(
        &self,
        counterparty: &CanonicalId,
        offset: usize,
    ) -> Result<Vec<HistoryRecord>> {
        let request = self
            .http
            .get(format!("{}/api/messages/history", self.server_url))
            .query(&DirectHistoryQuery {
                user_id: counterparty.as_str(),
                offset,
            });
        self.fetch_page(request, "direct history").await
    }

    async fn group_history(
        &self,
        group_id: &CanonicalId,
        query: GroupHistoryQuery,
    ) -> Result<Vec<HistoryRecord>> {
        let request = self
            .http
            .get(format!("{}/api/group/messages", self.server_url))
            .query(&GroupMessagesQuery {
                group_id: group_id.as_str(),
                before_id: query.before_id.as_deref(),
                limit: query.limit,
            });
        self.fetch_page(request, "group history").await
    }
}

#[cfg(test)]
#[path = "tests/history_tests.rs"]
mod tests;
