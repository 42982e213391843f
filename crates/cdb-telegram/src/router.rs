use std::{collections::HashMap, convert::Infallible, sync::Arc};

use teloxide::{
    dispatching::Dispatcher,
    dptree,
    error_handlers::LoggingErrorHandler,
    prelude::*,
    update_listeners::webhooks,
};

use tokio::sync::{Mutex, OwnedMutexGuard};

use cdb_core::{config::Config, machine::SessionMachine, messaging::port::MessagingPort};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub machine: Arc<SessionMachine>,
    pub messenger: Arc<dyn MessagingPort>,
    pub chat_locks: Arc<ChatLocks>,
}

/// Per-chat mutexes so messages from one chat are handled in order.
#[derive(Default)]
pub struct ChatLocks {
    inner: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl ChatLocks {
    pub async fn lock_chat(&self, chat_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            // An entry only the map still references is idle: nobody holds or awaits it.
            map.retain(|id, l| *id == chat_id || Arc::strong_count(l) > 1);
            map.entry(chat_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    pub(crate) async fn tracked(&self) -> usize {
        self.inner.lock().await.len()
    }
}

/// Run the bot until the dispatcher stops.
///
/// Uses a webhook when `WEBHOOK_URL` is configured, long polling otherwise.
pub async fn run(cfg: Arc<Config>, machine: Arc<SessionMachine>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    match bot.get_me().await {
        Ok(me) => tracing::info!(username = %me.username(), "bot started"),
        Err(e) => tracing::warn!(error = %e, "getMe failed; continuing"),
    }

    let messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let state = Arc::new(AppState {
        cfg: cfg.clone(),
        machine,
        messenger,
        chat_locks: Arc::new(ChatLocks::default()),
    });

    let handler = Update::filter_message().endpoint(handlers::handle_message);

    // Commands must not queue behind a running collection in the same chat, so
    // updates are not serialized per chat here; `ChatLocks` orders text instead.
    let mut dispatcher = Dispatcher::builder(bot.clone(), handler)
        .dependencies(dptree::deps![state])
        .distribution_function(|_| None::<Infallible>)
        .build();

    match &cfg.webhook_url {
        Some(url) => {
            let url = url
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid WEBHOOK_URL {url}: {e}"))?;
            tracing::info!(addr = %cfg.listen_addr, "listening for webhook updates");
            let listener =
                webhooks::axum(bot, webhooks::Options::new(cfg.listen_addr, url)).await?;
            dispatcher
                .dispatch_with_listener(
                    listener,
                    LoggingErrorHandler::with_custom_text("webhook listener error"),
                )
                .await;
        }
        None => {
            tracing::info!("polling for updates");
            dispatcher.dispatch().await;
        }
    }

    Ok(())
}
