//! X (Twitter) API v2 adapter.
//!
//! Implements the `ContentSource` port: one post lookup for the conversation id,
//! then recent-search pages over `conversation_id:<id>`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::{header::HeaderMap, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};

use cdb_core::{
    config::Config,
    domain::{AccountId, ConversationId, PostId},
    errors::Error,
    source::{ContentSource, ReplyPage, ThreadInfo},
    Result,
};

#[derive(Clone, Debug)]
pub struct XConfig {
    pub bearer_token: String,
    pub base_url: String,
    pub page_size: u32,
    pub timeout: Duration,
}

impl From<&Config> for XConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            bearer_token: cfg.x_bearer_token.clone(),
            base_url: cfg.x_api_base_url.clone(),
            page_size: cfg.page_size,
            timeout: cfg.http_timeout,
        }
    }
}

#[derive(Clone, Debug)]
pub struct XClient {
    cfg: XConfig,
    http: reqwest::Client,
}

// ============== Wire Types ==============

#[derive(Debug, Deserialize)]
struct ApiError {
    title: Option<String>,
    detail: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    data: Option<TweetData>,
    #[serde(default)]
    errors: Vec<ApiError>,
}

#[derive(Debug, Deserialize)]
struct TweetData {
    conversation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    data: Option<Vec<ReplyTweet>>,
    meta: Option<SearchMeta>,
}

#[derive(Debug, Deserialize)]
struct ReplyTweet {
    author_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchMeta {
    result_count: Option<u64>,
    next_token: Option<String>,
}

impl From<SearchResponse> for ReplyPage {
    fn from(resp: SearchResponse) -> Self {
        let (result_count, next_cursor) = match resp.meta {
            Some(meta) => (meta.result_count, meta.next_token),
            None => (None, None),
        };
        ReplyPage {
            authors: resp.data.map(|tweets| {
                tweets
                    .into_iter()
                    .filter_map(|t| t.author_id)
                    .map(AccountId)
                    .collect()
            }),
            result_count,
            next_cursor,
        }
    }
}

// ============== Client ==============

impl XClient {
    pub fn new(cfg: XConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| Error::Config(format!("x api client build failed: {e}")))?;
        Ok(Self { cfg, http })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}{path}", self.cfg.base_url);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.cfg.bearer_token)
            .query(query)
            .send()
            .await
            .map_err(|e| Error::External(format!("x api request error: {e}")))?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = retry_after(resp.headers());
            tracing::warn!(
                path,
                retry_after_s = retry_after.map(|d| d.as_secs()),
                "x api quota exceeded"
            );
            return Err(Error::QuotaExceeded { retry_after });
        }

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::External(format!(
                "x api error: {status} {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::External(format!("x api read error: {e}")))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Prefer `retry-after` (seconds); fall back to `x-rate-limit-reset` (epoch seconds).
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let header_u64 = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    };

    if let Some(secs) = header_u64("retry-after") {
        return Some(Duration::from_secs(secs));
    }

    let reset = header_u64("x-rate-limit-reset")?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    Some(Duration::from_secs(reset.saturating_sub(now)))
}

#[async_trait]
impl ContentSource for XClient {
    async fn lookup_thread(&self, post_id: &PostId) -> Result<ThreadInfo> {
        let resp: LookupResponse = self
            .get_json(
                &format!("/2/tweets/{post_id}"),
                &[("tweet.fields", "conversation_id".to_string())],
            )
            .await?;

        let Some(data) = resp.data else {
            let detail = resp
                .errors
                .first()
                .and_then(|e| e.detail.clone().or_else(|| e.title.clone()))
                .unwrap_or_else(|| "no data".to_string());
            return Err(Error::External(format!("post {post_id} lookup failed: {detail}")));
        };

        Ok(ThreadInfo {
            conversation_id: data.conversation_id.map(ConversationId),
        })
    }

    async fn list_replies(
        &self,
        conversation_id: &ConversationId,
        cursor: Option<&str>,
    ) -> Result<ReplyPage> {
        let mut query = vec![
            ("query", format!("conversation_id:{conversation_id}")),
            ("max_results", self.cfg.page_size.to_string()),
            ("tweet.fields", "author_id".to_string()),
        ];
        if let Some(c) = cursor {
            query.push(("next_token", c.to_string()));
        }

        let resp: SearchResponse = self.get_json("/2/tweets/search/recent", &query).await?;
        Ok(resp.into())
    }
}
