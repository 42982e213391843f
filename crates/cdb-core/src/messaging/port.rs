use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageRef},
    formatting::split_message,
    messaging::types::MessagingCapabilities,
    Result,
};

/// Outbound delivery port.
///
/// The core only produces rendered HTML; adapters decide how to transmit it.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    fn capabilities(&self) -> MessagingCapabilities;

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef>;
}

/// Send `html` in as many messages as the messenger's limit requires.
///
/// Delivery is best-effort: a failed chunk is logged and the rest still go out.
pub async fn send_split(
    messenger: &dyn MessagingPort,
    chat_id: ChatId,
    html: &str,
    safe_limit: usize,
) -> usize {
    let limit = safe_limit.min(messenger.capabilities().max_message_len);
    let mut sent = 0usize;
    for chunk in split_message(html, limit) {
        match messenger.send_html(chat_id, &chunk).await {
            Ok(_) => sent += 1,
            Err(e) => tracing::warn!(chat_id = chat_id.0, error = %e, "message delivery failed"),
        }
    }
    sent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MessageId;
    use crate::errors::Error;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingMessenger {
        sent: Mutex<Vec<String>>,
        fail_first: bool,
    }

    #[async_trait]
    impl MessagingPort for RecordingMessenger {
        fn capabilities(&self) -> MessagingCapabilities {
            MessagingCapabilities {
                max_message_len: 30,
            }
        }

        async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
            let mut sent = self.sent.lock().unwrap();
            sent.push(html.to_string());
            if self.fail_first && sent.len() == 1 {
                return Err(Error::External("flood".to_string()));
            }
            Ok(MessageRef {
                chat_id,
                message_id: MessageId(sent.len() as i32),
            })
        }
    }

    #[tokio::test]
    async fn splits_by_the_smaller_limit() {
        let m = RecordingMessenger::default();
        let text = "0123456789\n0123456789\n0123456789";
        let sent = send_split(&m, ChatId(1), text, 4000).await;

        assert_eq!(sent, 2);
        let chunks = m.sent.lock().unwrap().clone();
        assert_eq!(chunks, vec!["0123456789\n0123456789", "0123456789"]);
    }

    #[tokio::test]
    async fn failed_chunks_do_not_stop_delivery() {
        let m = RecordingMessenger {
            fail_first: true,
            ..Default::default()
        };
        let text = "0123456789\n0123456789\n0123456789";
        let sent = send_split(&m, ChatId(1), text, 4000).await;

        assert_eq!(sent, 1);
        assert_eq!(m.sent.lock().unwrap().len(), 2);
    }
}
