use cdb_core::{
    domain::ChatId,
    formatting::COLLECTING_NOTICE,
    machine::{Input, Outcome},
    messaging::port::send_split,
};

use crate::router::AppState;

use super::deliver;

pub async fn handle_text(chat_id: ChatId, text: &str, state: &AppState) -> Outcome {
    let _guard = state.chat_locks.lock_chat(chat_id.0).await;

    if state.machine.expects_post(chat_id).await {
        send_split(
            state.messenger.as_ref(),
            chat_id,
            COLLECTING_NOTICE,
            state.cfg.telegram_safe_limit,
        )
        .await;
    }

    let outcome = state
        .machine
        .handle(chat_id, Input::Text(text.trim().to_string()))
        .await;

    if matches!(outcome, Outcome::Superseded) {
        tracing::info!(chat_id = chat_id.0, "stale collection discarded");
    }
    deliver(state, chat_id, &outcome).await;
    outcome
}
