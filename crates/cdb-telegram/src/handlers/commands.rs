use cdb_core::{
    domain::ChatId,
    machine::{Command, Input, Outcome},
};

use crate::router::AppState;

use super::deliver;

fn parse_command(text: &str) -> String {
    // Telegram may send `/cmd@botname arg1 ...`
    let first = text.split_whitespace().next().unwrap_or("");
    first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase()
}

pub async fn handle_command(chat_id: ChatId, text: &str, state: &AppState) -> Outcome {
    let name = parse_command(text);
    let command = Command::from_name(&name);
    tracing::info!(chat_id = chat_id.0, command = %name, "command received");

    let _guard = match command {
        Command::Start => None,
        _ => Some(state.chat_locks.lock_chat(chat_id.0).await),
    };

    let outcome = state.machine.handle(chat_id, Input::Command(command)).await;
    deliver(state, chat_id, &outcome).await;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_bot_mention_and_arguments() {
        assert_eq!(parse_command("/start"), "start");
        assert_eq!(parse_command("/Done@CommenterDiffBot"), "done");
        assert_eq!(parse_command("  /status extra words"), "status");
        assert_eq!(parse_command("/"), "");
    }
}
