//! Telegram update handlers.
//!
//! Messages from one chat are handled in arrival order under the chat lock.
//! `/start` alone skips the lock so it can supersede a collection in flight.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};

use cdb_core::{
    domain::ChatId,
    formatting::render_outcome,
    machine::Outcome,
    messaging::port::send_split,
};

use crate::router::AppState;

mod commands;
mod text;

const NON_TEXT_HINT: &str = "Please send a post URL as plain text, or /help for the commands.";

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let chat_id = ChatId(msg.chat.id.0);

    let Some(text) = msg.text() else {
        send_split(
            state.messenger.as_ref(),
            chat_id,
            NON_TEXT_HINT,
            state.cfg.telegram_safe_limit,
        )
        .await;
        return Ok(());
    };

    if text.starts_with('/') {
        commands::handle_command(chat_id, text, &state).await;
    } else {
        text::handle_text(chat_id, text, &state).await;
    }
    Ok(())
}

async fn deliver(state: &AppState, chat_id: ChatId, outcome: &Outcome) {
    let html = render_outcome(outcome);
    send_split(
        state.messenger.as_ref(),
        chat_id,
        &html,
        state.cfg.telegram_safe_limit,
    )
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::ChatLocks;
    use async_trait::async_trait;
    use cdb_core::{
        collector::{CollectorConfig, CommenterCollector},
        config::Config,
        domain::{AccountId, ConversationId, MessageId, MessageRef, PostId},
        machine::SessionMachine,
        messaging::{port::MessagingPort, types::MessagingCapabilities},
        normalizer::UrlNormalizer,
        rate_limit::RateLimiter,
        session::SessionStore,
        source::{ContentSource, ReplyPage, ThreadInfo},
    };
    use std::time::Duration;
    use tokio::sync::{Mutex, Notify};

    /// Every post has two repliers; replies for `parked` wait for `release`.
    struct ParkingSource {
        parked: String,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl ContentSource for ParkingSource {
        async fn lookup_thread(&self, _post: &PostId) -> cdb_core::Result<ThreadInfo> {
            Ok(ThreadInfo {
                conversation_id: None,
            })
        }

        async fn list_replies(
            &self,
            conversation: &ConversationId,
            _cursor: Option<&str>,
        ) -> cdb_core::Result<ReplyPage> {
            if conversation.0 == self.parked {
                self.entered.notify_one();
                self.release.notified().await;
            }
            Ok(ReplyPage {
                authors: Some(vec![
                    AccountId::new(format!("a{}", conversation.0)),
                    AccountId::new("shared"),
                ]),
                result_count: Some(2),
                next_cursor: None,
            })
        }
    }

    #[derive(Default)]
    struct RecordingMessenger {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MessagingPort for RecordingMessenger {
        fn capabilities(&self) -> MessagingCapabilities {
            MessagingCapabilities {
                max_message_len: 4096,
            }
        }

        async fn send_html(&self, chat_id: ChatId, html: &str) -> cdb_core::Result<MessageRef> {
            self.sent.lock().await.push(html.to_string());
            Ok(MessageRef {
                chat_id,
                message_id: MessageId(1),
            })
        }
    }

    fn app_state(
        source: Arc<ParkingSource>,
        messenger: Arc<RecordingMessenger>,
    ) -> Arc<AppState> {
        let cfg = Config::from_lookup(|key| match key {
            "TELEGRAM_BOT_TOKEN" | "X_BEARER_TOKEN" => Some("test".to_string()),
            _ => None,
        })
        .unwrap();
        let collector = CommenterCollector::new(
            source,
            Arc::new(RateLimiter::new(false, 1, Duration::from_secs(1))),
            CollectorConfig::default(),
        );
        let normalizer =
            UrlNormalizer::new(vec!["t.co".to_string()], Duration::from_secs(1)).unwrap();
        Arc::new(AppState {
            cfg: Arc::new(cfg),
            machine: Arc::new(SessionMachine::new(
                Arc::new(SessionStore::new()),
                Arc::new(normalizer),
                Arc::new(collector),
            )),
            messenger,
            chat_locks: Arc::new(ChatLocks::default()),
        })
    }

    const CHAT: ChatId = ChatId(7);

    fn post(n: u32) -> String {
        format!("https://x.com/u/status/{n}")
    }

    async fn main_and_one_comparison(state: &AppState) {
        commands::handle_command(CHAT, "/start", state).await;
        text::handle_text(CHAT, &post(1), state).await;
        text::handle_text(CHAT, &post(2), state).await;
    }

    #[tokio::test]
    async fn finish_waits_for_an_earlier_post() {
        let source = Arc::new(ParkingSource {
            parked: "3".to_string(),
            entered: Notify::new(),
            release: Notify::new(),
        });
        let messenger = Arc::new(RecordingMessenger::default());
        let state = app_state(source.clone(), messenger.clone());
        main_and_one_comparison(&state).await;

        let pending = tokio::spawn({
            let state = state.clone();
            async move { text::handle_text(CHAT, &post(3), &state).await }
        });
        source.entered.notified().await;

        let finish = tokio::spawn({
            let state = state.clone();
            async move { commands::handle_command(CHAT, "/done", &state).await }
        });
        tokio::task::yield_now().await;
        assert!(!finish.is_finished());

        source.release.notify_one();
        assert!(matches!(
            pending.await.unwrap(),
            Outcome::ComparisonAdded { total: 2, .. }
        ));
        match finish.await.unwrap() {
            Outcome::Report(report) => assert_eq!(report.entries.len(), 2),
            other => panic!("expected a report, got {other:?}"),
        }

        let sent = messenger.sent.lock().await;
        let last = sent.last().unwrap();
        assert!(last.contains("Comparison results for"));
        assert!(last.contains("status/3"));
    }

    #[tokio::test]
    async fn start_supersedes_a_collection_in_flight() {
        let source = Arc::new(ParkingSource {
            parked: "3".to_string(),
            entered: Notify::new(),
            release: Notify::new(),
        });
        let state = app_state(source.clone(), Arc::new(RecordingMessenger::default()));
        main_and_one_comparison(&state).await;

        let pending = tokio::spawn({
            let state = state.clone();
            async move { text::handle_text(CHAT, &post(3), &state).await }
        });
        source.entered.notified().await;

        let restarted = commands::handle_command(CHAT, "/start@CommenterDiffBot", &state).await;
        assert!(matches!(restarted, Outcome::Started));

        source.release.notify_one();
        assert!(matches!(pending.await.unwrap(), Outcome::Superseded));
    }
}
