use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;

use crate::{
    domain::{CanonicalRef, CommenterSet, ConversationId},
    errors::Error,
    normalizer::extract_id,
    rate_limit::RateLimiter,
    source::{ContentSource, ReplyPage},
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct CollectorConfig {
    /// Wait before the single retry of a quota-rejected call.
    pub quota_cooldown: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            quota_cooldown: Duration::from_secs(60),
        }
    }
}

/// Accumulator for one collection run. The cursor never outlives the run.
#[derive(Clone, Debug, Default)]
pub struct CollectionResult {
    pub commenters: CommenterSet,
    pub cursor: Option<String>,
}

impl CollectionResult {
    /// Merge a page; returns how many authors were new.
    fn absorb(&mut self, page: ReplyPage) -> usize {
        let before = self.commenters.len();
        self.commenters.extend(page.authors.unwrap_or_default());
        self.cursor = page.next_cursor.filter(|c| !c.is_empty());
        self.commenters.len() - before
    }
}

/// Retrieves every account that replied to a post.
///
/// Every upstream call goes through the shared [`RateLimiter`].
pub struct CommenterCollector {
    source: Arc<dyn ContentSource>,
    limiter: Arc<RateLimiter>,
    cfg: CollectorConfig,
}

impl CommenterCollector {
    pub fn new(
        source: Arc<dyn ContentSource>,
        limiter: Arc<RateLimiter>,
        cfg: CollectorConfig,
    ) -> Self {
        Self {
            source,
            limiter,
            cfg,
        }
    }

    pub async fn collect(&self, reference: &CanonicalRef) -> Result<CommenterSet> {
        let post_id = extract_id(reference).ok_or_else(|| {
            Error::InvalidReference(format!("not a post link: {reference}"))
        })?;

        let thread = self
            .gated(|| self.source.lookup_thread(&post_id))
            .await
            .map_err(into_collection_error)?;
        let conversation_id = thread
            .conversation_id
            .unwrap_or_else(|| ConversationId(post_id.0.clone()));

        let mut acc = CollectionResult::default();
        let mut pages = 0usize;
        loop {
            let cursor = acc.cursor.take();
            let page = self
                .gated(|| self.source.list_replies(&conversation_id, cursor.as_deref()))
                .await
                .map_err(into_collection_error)?;
            pages += 1;

            if page.is_empty_response() {
                return Err(Error::EmptyResponse(format!(
                    "page {pages} of conversation {conversation_id} had no data and no result count"
                )));
            }

            let added = acc.absorb(page);
            tracing::debug!(
                conversation = %conversation_id,
                page = pages,
                added,
                total = acc.commenters.len(),
                "reply page collected"
            );

            if acc.cursor.is_none() {
                break;
            }
        }

        tracing::info!(
            post = %post_id,
            conversation = %conversation_id,
            pages,
            commenters = acc.commenters.len(),
            "collection finished"
        );
        Ok(acc.commenters)
    }

    /// Run one upstream call behind the limiter, retrying once on quota rejection.
    async fn gated<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            self.limiter.admit().await;
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempts < MAX_RETRIES => {
                    attempts += 1;
                    tracing::warn!(
                        error = %e,
                        cooldown_ms = self.cfg.quota_cooldown.as_millis() as u64,
                        "quota exceeded, retrying after cooldown"
                    );
                    sleep(self.cfg.quota_cooldown).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn into_collection_error(e: Error) -> Error {
    match e {
        Error::InvalidReference(_) | Error::EmptyResponse(_) | Error::CollectionFailure(_) => e,
        other => Error::CollectionFailure(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccountId, PostId};
    use crate::normalizer::normalize;
    use crate::source::ThreadInfo;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[derive(Default)]
    struct ScriptedSource {
        lookups: Mutex<VecDeque<Result<ThreadInfo>>>,
        pages: Mutex<VecDeque<Result<ReplyPage>>>,
        lookup_calls: Mutex<Vec<String>>,
        page_calls: Mutex<Vec<(String, Option<String>)>>,
    }

    impl ScriptedSource {
        fn with(lookups: Vec<Result<ThreadInfo>>, pages: Vec<Result<ReplyPage>>) -> Self {
            Self {
                lookups: Mutex::new(lookups.into()),
                pages: Mutex::new(pages.into()),
                ..Default::default()
            }
        }

        fn page_calls(&self) -> Vec<(String, Option<String>)> {
            self.page_calls.lock().unwrap().clone()
        }

        fn lookup_calls(&self) -> usize {
            self.lookup_calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ContentSource for ScriptedSource {
        async fn lookup_thread(&self, post_id: &PostId) -> Result<ThreadInfo> {
            self.lookup_calls.lock().unwrap().push(post_id.0.clone());
            self.lookups
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ThreadInfo::default()))
        }

        async fn list_replies(
            &self,
            conversation_id: &ConversationId,
            cursor: Option<&str>,
        ) -> Result<ReplyPage> {
            self.page_calls
                .lock()
                .unwrap()
                .push((conversation_id.0.clone(), cursor.map(str::to_string)));
            self.pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::External("script exhausted".to_string())))
        }
    }

    fn page(authors: &[&str], next: Option<&str>) -> Result<ReplyPage> {
        Ok(ReplyPage {
            authors: Some(authors.iter().map(|a| AccountId::new(*a)).collect()),
            result_count: Some(authors.len() as u64),
            next_cursor: next.map(str::to_string),
        })
    }

    fn thread(id: &str) -> Result<ThreadInfo> {
        Ok(ThreadInfo {
            conversation_id: Some(ConversationId(id.to_string())),
        })
    }

    fn quota() -> Error {
        Error::QuotaExceeded { retry_after: None }
    }

    fn collector(source: Arc<ScriptedSource>, limiter: RateLimiter) -> CommenterCollector {
        CommenterCollector::new(
            source,
            Arc::new(limiter),
            CollectorConfig {
                quota_cooldown: Duration::from_secs(30),
            },
        )
    }

    fn unlimited() -> RateLimiter {
        RateLimiter::new(false, 1, Duration::from_secs(1))
    }

    fn post() -> CanonicalRef {
        normalize("https://twitter.com/jack/status/20").unwrap()
    }

    fn ids(set: &CommenterSet) -> Vec<String> {
        let mut v: Vec<String> = set.iter().map(|a| a.0.clone()).collect();
        v.sort();
        v
    }

    #[tokio::test]
    async fn pages_until_cursor_is_absent() {
        let source = Arc::new(ScriptedSource::with(
            vec![thread("99")],
            vec![
                page(&["a", "b"], Some("c1")),
                page(&["c", "d"], Some("c2")),
                page(&["a", "c"], None),
            ],
        ));
        let c = collector(source.clone(), unlimited());

        let set = c.collect(&post()).await.unwrap();
        assert_eq!(ids(&set), vec!["a", "b", "c", "d"]);
        assert_eq!(
            source.page_calls(),
            vec![
                ("99".to_string(), None),
                ("99".to_string(), Some("c1".to_string())),
                ("99".to_string(), Some("c2".to_string())),
            ]
        );
    }

    #[tokio::test]
    async fn invalid_reference_fails_fast() {
        let source = Arc::new(ScriptedSource::default());
        let c = collector(source.clone(), unlimited());

        let r = normalize("https://x.com/jack").unwrap();
        let err = c.collect(&r).await.unwrap_err();
        assert!(matches!(err, Error::InvalidReference(_)));
        assert_eq!(source.lookup_calls(), 0);
        assert!(source.page_calls().is_empty());
    }

    #[tokio::test]
    async fn zero_replies_is_an_empty_set() {
        let source = Arc::new(ScriptedSource::with(
            vec![thread("20")],
            vec![Ok(ReplyPage {
                authors: None,
                result_count: Some(0),
                next_cursor: None,
            })],
        ));
        let c = collector(source, unlimited());

        let set = c.collect(&post()).await.unwrap();
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn page_without_data_or_count_is_empty_response() {
        let source = Arc::new(ScriptedSource::with(
            vec![thread("20")],
            vec![Ok(ReplyPage::default())],
        ));
        let c = collector(source, unlimited());

        let err = c.collect(&post()).await.unwrap_err();
        assert!(matches!(err, Error::EmptyResponse(_)));
    }

    #[tokio::test]
    async fn conversation_defaults_to_post_id() {
        let source = Arc::new(ScriptedSource::with(
            vec![Ok(ThreadInfo::default())],
            vec![page(&["a"], None)],
        ));
        let c = collector(source.clone(), unlimited());

        c.collect(&post()).await.unwrap();
        assert_eq!(source.page_calls(), vec![("20".to_string(), None)]);
    }

    #[tokio::test(start_paused = true)]
    async fn quota_rejection_is_retried_once_after_cooldown() {
        let source = Arc::new(ScriptedSource::with(
            vec![Err(quota()), thread("20")],
            vec![Err(quota()), page(&["a"], None)],
        ));
        let c = collector(source.clone(), unlimited());
        let start = Instant::now();

        let set = c.collect(&post()).await.unwrap();
        assert_eq!(ids(&set), vec!["a"]);
        assert_eq!(source.lookup_calls(), 2);
        assert_eq!(source.page_calls().len(), 2);
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_quota_rejection_becomes_collection_failure() {
        let source = Arc::new(ScriptedSource::with(
            vec![thread("20")],
            vec![Err(quota()), Err(quota()), page(&["a"], None)],
        ));
        let c = collector(source.clone(), unlimited());

        let err = c.collect(&post()).await.unwrap_err();
        assert!(matches!(err, Error::CollectionFailure(_)));
        assert_eq!(source.page_calls().len(), 2);
    }

    #[tokio::test]
    async fn other_upstream_errors_are_not_retried() {
        let source = Arc::new(ScriptedSource::with(
            vec![Err(Error::External("boom".to_string()))],
            vec![],
        ));
        let c = collector(source.clone(), unlimited());

        let err = c.collect(&post()).await.unwrap_err();
        assert!(matches!(err, Error::CollectionFailure(ref m) if m.contains("boom")));
        assert_eq!(source.lookup_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn every_call_passes_the_limiter() {
        let source = Arc::new(ScriptedSource::with(
            vec![thread("20")],
            vec![
                page(&["a"], Some("c1")),
                page(&["b"], Some("c2")),
                page(&["c"], None),
            ],
        ));
        let c = collector(
            source,
            RateLimiter::new(true, 2, Duration::from_millis(1000)),
        );
        let start = Instant::now();

        let set = c.collect(&post()).await.unwrap();
        assert_eq!(set.len(), 3);
        // Four calls at two per window: the last two wait one window.
        assert_eq!(start.elapsed(), Duration::from_millis(1000));
    }
}
