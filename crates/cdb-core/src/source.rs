use async_trait::async_trait;

use crate::{
    domain::{AccountId, ConversationId, PostId},
    Result,
};

/// Result of looking up a single post.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ThreadInfo {
    /// `None` when upstream does not report one; the post is then its own thread.
    pub conversation_id: Option<ConversationId>,
}

/// One page of replies as reported by upstream.
///
/// `authors` and `result_count` are kept raw so the collector can tell a
/// legitimately empty page (count of zero) from a malformed one (neither).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplyPage {
    pub authors: Option<Vec<AccountId>>,
    pub result_count: Option<u64>,
    pub next_cursor: Option<String>,
}

impl ReplyPage {
    pub fn is_empty_response(&self) -> bool {
        self.authors.is_none() && self.result_count.is_none()
    }
}

/// Hexagonal port for the external content API.
///
/// Implementations must report quota rejections as `Error::QuotaExceeded`.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn lookup_thread(&self, post_id: &PostId) -> Result<ThreadInfo>;

    async fn list_replies(
        &self,
        conversation_id: &ConversationId,
        cursor: Option<&str>,
    ) -> Result<ReplyPage>;
}
