use std::sync::Arc;

use crate::{
    collector::CommenterCollector,
    diff::{diff_session, DiffReport},
    domain::{CanonicalRef, ChatId},
    errors::Error,
    normalizer::UrlNormalizer,
    session::{CollectedPost, SessionSnapshot, SessionState, SessionStore},
    Result,
};

// ============== Inputs ==============

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Start,
    Done,
    Help,
    Status,
    Unknown(String),
}

impl Command {
    /// Map a bare command name (no slash, no `@bot` suffix) to a command.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "start" => Command::Start,
            "done" | "finish" => Command::Done,
            "help" => Command::Help,
            "status" => Command::Status,
            other => Command::Unknown(other.to_string()),
        }
    }
}

/// A classified chat message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Input {
    Command(Command),
    Text(String),
}

// ============== Transitions ==============

/// Why a message could not move the session forward.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    FinishWithoutSession,
    FinishWithoutMain,
    FinishWithoutComparisons,
    TextWithoutSession,
    UnknownCommand(String),
}

/// Side effect the machine must run for an input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    Reset,
    Finish,
    CollectMain(String),
    CollectComparison(String),
    ShowHelp,
    ShowStatus,
    Reject(Rejection),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub step: Step,
    /// State once the step succeeds. Failed steps leave the state unchanged.
    pub next: SessionState,
}

/// Pure transition function over `(state, input)`.
pub fn plan(state: SessionState, comparisons: usize, input: &Input) -> Transition {
    use SessionState::*;

    let stay = |step| Transition { step, next: state };

    match (input, state) {
        (Input::Command(Command::Start), _) => Transition {
            step: Step::Reset,
            next: AwaitingMain,
        },

        (Input::Command(Command::Done), AwaitingOthers) if comparisons > 0 => Transition {
            step: Step::Finish,
            next: None,
        },
        (Input::Command(Command::Done), AwaitingOthers) => {
            stay(Step::Reject(Rejection::FinishWithoutComparisons))
        }
        (Input::Command(Command::Done), AwaitingMain) => {
            stay(Step::Reject(Rejection::FinishWithoutMain))
        }
        (Input::Command(Command::Done), None) => {
            stay(Step::Reject(Rejection::FinishWithoutSession))
        }

        (Input::Command(Command::Help), _) => stay(Step::ShowHelp),
        (Input::Command(Command::Status), _) => stay(Step::ShowStatus),
        (Input::Command(Command::Unknown(name)), _) => {
            stay(Step::Reject(Rejection::UnknownCommand(name.clone())))
        }

        (Input::Text(text), AwaitingMain) => Transition {
            step: Step::CollectMain(text.clone()),
            next: AwaitingOthers,
        },
        (Input::Text(text), AwaitingOthers) => stay(Step::CollectComparison(text.clone())),
        (Input::Text(_), None) => stay(Step::Reject(Rejection::TextWithoutSession)),
    }
}

// ============== Outcomes ==============

/// Plain result handed to the delivery layer.
#[derive(Debug)]
pub enum Outcome {
    Started,
    Help(SessionState),
    Status(Option<SessionSnapshot>),
    MainAccepted {
        post: CanonicalRef,
        commenters: usize,
    },
    ComparisonAdded {
        post: CanonicalRef,
        commenters: usize,
        total: usize,
    },
    Report(DiffReport),
    Rejected(Rejection),
    /// Collection failed; the session is untouched and still in `state`.
    Failed {
        state: SessionState,
        error: Error,
    },
    /// A collection finished after its session was restarted or finished.
    Superseded,
}

// ============== Machine ==============

/// Drives one chat's compare flow against the shared store.
pub struct SessionMachine {
    store: Arc<SessionStore>,
    normalizer: Arc<UrlNormalizer>,
    collector: Arc<CommenterCollector>,
}

impl SessionMachine {
    pub fn new(
        store: Arc<SessionStore>,
        normalizer: Arc<UrlNormalizer>,
        collector: Arc<CommenterCollector>,
    ) -> Self {
        Self {
            store,
            normalizer,
            collector,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Whether a text message from `key` would trigger a collection.
    pub async fn expects_post(&self, key: ChatId) -> bool {
        self.store.state(key).await != SessionState::None
    }

    pub async fn handle(&self, key: ChatId, input: Input) -> Outcome {
        let snapshot = self.store.snapshot(key).await;
        let state = snapshot
            .as_ref()
            .map(|s| s.state)
            .unwrap_or(SessionState::None);
        let comparisons = snapshot.as_ref().map(|s| s.comparisons).unwrap_or(0);
        let generation = snapshot.as_ref().map(|s| s.generation).unwrap_or(0);

        let transition = plan(state, comparisons, &input);
        tracing::debug!(chat_id = key.0, ?state, step = ?transition.step, "planned transition");

        match transition.step {
            Step::Reset => {
                let generation = self.store.start(key).await;
                tracing::info!(chat_id = key.0, generation, "session started");
                Outcome::Started
            }
            Step::Finish => self.finish(key).await,
            Step::CollectMain(raw) => self.collect_main(key, generation, &raw).await,
            Step::CollectComparison(raw) => self.collect_comparison(key, generation, &raw).await,
            Step::ShowHelp => Outcome::Help(state),
            Step::ShowStatus => Outcome::Status(snapshot),
            Step::Reject(rejection) => {
                tracing::debug!(chat_id = key.0, ?rejection, "input rejected");
                Outcome::Rejected(rejection)
            }
        }
    }

    async fn finish(&self, key: ChatId) -> Outcome {
        let Some(session) = self.store.take_complete(key).await else {
            // Lost a race with a concurrent restart.
            return Outcome::Rejected(Rejection::FinishWithoutComparisons);
        };
        match diff_session(&session) {
            Some(report) => {
                tracing::info!(
                    chat_id = key.0,
                    comparisons = report.entries.len(),
                    "session finished"
                );
                match report.to_json() {
                    Ok(json) => tracing::debug!(chat_id = key.0, report = %json, "diff report"),
                    Err(e) => tracing::warn!(chat_id = key.0, error = %e, "report not serializable"),
                }
                Outcome::Report(report)
            }
            None => Outcome::Rejected(Rejection::FinishWithoutComparisons),
        }
    }

    async fn collect_main(&self, key: ChatId, generation: u64, raw: &str) -> Outcome {
        let collected = match self.fetch(raw).await {
            Ok(c) => c,
            Err(error) => return self.failed(key, SessionState::AwaitingMain, error),
        };

        let post = collected.post.clone();
        let commenters = collected.commenters.len();
        if !self.store.set_main(key, generation, collected).await {
            tracing::warn!(chat_id = key.0, generation, "discarding stale main post");
            return Outcome::Superseded;
        }

        tracing::info!(chat_id = key.0, post = %post, commenters, "main post accepted");
        Outcome::MainAccepted { post, commenters }
    }

    async fn collect_comparison(&self, key: ChatId, generation: u64, raw: &str) -> Outcome {
        let collected = match self.fetch(raw).await {
            Ok(c) => c,
            Err(error) => return self.failed(key, SessionState::AwaitingOthers, error),
        };

        let post = collected.post.clone();
        let commenters = collected.commenters.len();
        let Some(total) = self.store.add_comparison(key, generation, collected).await else {
            tracing::warn!(chat_id = key.0, generation, "discarding stale comparison");
            return Outcome::Superseded;
        };

        tracing::info!(chat_id = key.0, post = %post, commenters, total, "comparison added");
        Outcome::ComparisonAdded {
            post,
            commenters,
            total,
        }
    }

    async fn fetch(&self, raw: &str) -> Result<CollectedPost> {
        let post = self.normalizer.canonicalize(raw).await?;
        let commenters = self.collector.collect(&post).await?;
        Ok(CollectedPost { post, commenters })
    }

    fn failed(&self, key: ChatId, state: SessionState, error: Error) -> Outcome {
        tracing::warn!(chat_id = key.0, error = %error, "collection failed");
        Outcome::Failed { state, error }
    }
}
