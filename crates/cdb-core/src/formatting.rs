//! Rendering of machine outcomes as Telegram HTML.

use chrono::Utc;

use crate::{
    diff::DiffReport,
    errors::Error,
    machine::{Outcome, Rejection},
    session::{SessionSnapshot, SessionState},
};

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub const COLLECTING_NOTICE: &str = "⏳ Collecting commenters, this can take a while for busy posts…";

pub fn render_outcome(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Started => {
            "👋 Welcome! Please send me the URL of the main post (Post A).".to_string()
        }
        Outcome::Help(state) => render_help(*state),
        Outcome::Status(snapshot) => render_status(snapshot.as_ref()),
        Outcome::MainAccepted { post, commenters } => format!(
            "✅ Main post received: {} ({commenters} commenters).\n\n\
Now send me the URLs of the posts to compare, one at a time. Send /done when you're finished.",
            escape_html(post.as_str())
        ),
        Outcome::ComparisonAdded {
            post,
            commenters,
            total,
        } => format!(
            "➕ Post added for comparison: {} ({commenters} commenters).\n\
You've added {total} {}. Send another URL or /done to finish.",
            escape_html(post.as_str()),
            if *total == 1 { "post" } else { "posts" }
        ),
        Outcome::Report(report) => render_report(report),
        Outcome::Rejected(rejection) => render_rejection(rejection),
        Outcome::Failed { error, .. } => render_failure(error),
        Outcome::Superseded => {
            "ℹ️ A post finished collecting after its comparison was restarted or completed; \
its result was discarded."
                .to_string()
        }
    }
}

fn render_help(state: SessionState) -> String {
    let next = match state {
        SessionState::None => "Send /start to begin.",
        SessionState::AwaitingMain => "Send the URL of the main post.",
        SessionState::AwaitingOthers => "Send a comparison post URL, or /done for the report.",
    };
    format!(
        "🤖 <b>Commenter Diff Bot</b>\n\n\
Finds accounts that replied to a main post but not to other posts.\n\n\
<b>📋 Commands:</b>\n\
/start - Start a new comparison (discards the current one)\n\
/done - Compare and show the report\n\
/status - Show the current comparison\n\
/help - Show this message\n\n\
Next: {next}"
    )
}

fn render_status(snapshot: Option<&SessionSnapshot>) -> String {
    let Some(s) = snapshot else {
        return "📊 No comparison in progress. Send /start to begin.".to_string();
    };

    let mut lines = vec![
        "📊 <b>Comparison Status</b>\n".to_string(),
        format!("State: {}", s.state.label()),
    ];
    if let Some(post) = &s.main_post {
        lines.push(format!(
            "Main post: {} ({} commenters)",
            escape_html(post.as_str()),
            s.main_commenters.unwrap_or(0)
        ));
    }
    lines.push(format!("Comparison posts: {}", s.comparisons));
    let age = Utc::now().signed_duration_since(s.started_at).num_seconds();
    lines.push(format!("Started: {} ago", format_duration(age)));
    lines.join("\n")
}

fn render_rejection(rejection: &Rejection) -> String {
    match rejection {
        Rejection::FinishWithoutSession => {
            "Nothing to compare yet. Send /start to begin.".to_string()
        }
        Rejection::FinishWithoutMain => {
            "Not enough data to compare. Send the URL of the main post first.".to_string()
        }
        Rejection::FinishWithoutComparisons => {
            "Not enough data to compare. Send at least one post URL to compare against."
                .to_string()
        }
        Rejection::TextWithoutSession => {
            "Please start the process with /start or finish with /done.".to_string()
        }
        Rejection::UnknownCommand(name) => format!(
            "Unknown command /{}. Try /start to begin.",
            escape_html(name)
        ),
    }
}

fn render_failure(error: &Error) -> String {
    let hint = match error {
        Error::InvalidReference(_) => "Please send a valid post URL.",
        _ => "Please try again or send a different post URL.",
    };
    format!("❌ Error: {}. {hint}", escape_html(&error.to_string()))
}

pub fn render_report(report: &DiffReport) -> String {
    let mut out = format!(
        "📊 <b>Comparison results for</b> {} ({} commenters):\n\n",
        escape_html(report.main_post.as_str()),
        report.main_commenters
    );

    for (i, entry) in report.entries.iter().enumerate() {
        out.push_str(&format!(
            "<b>Compared with post {}</b> ({}):\n",
            i + 1,
            escape_html(entry.compared_with.as_str())
        ));
        out.push_str(&format!(
            "Unique commenters (did not comment here): {}\n",
            entry.count()
        ));
        if entry.count() > 0 {
            let ids = entry
                .unique_commenters
                .iter()
                .map(|a| escape_html(&a.0))
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!("User IDs: {ids}\n"));
        }
        out.push('\n');
    }

    out.trim_end().to_string()
}

fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let hours = seconds / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        return format!("{hours}h {mins}m {secs}s");
    }
    if mins > 0 {
        return format!("{mins}m {secs}s");
    }
    format!("{secs}s")
}

/// Split a message into chunks of at most `limit` bytes at line boundaries.
///
/// Lines longer than the limit are broken at the last space that fits, or at a
/// char boundary when there is none. Markup is only ever emitted on short lines.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(16);
    if text.len() <= limit {
        return vec![text.to_string()];
    }

    let mut out = Vec::new();
    let mut chunk = String::new();

    for line in text.split('\n') {
        let mut rest = line;
        loop {
            let sep = usize::from(!chunk.is_empty());
            if chunk.len() + sep + rest.len() <= limit {
                if sep == 1 {
                    chunk.push('\n');
                }
                chunk.push_str(rest);
                break;
            }

            if !chunk.is_empty() {
                out.push(std::mem::take(&mut chunk));
                continue;
            }

            let cut = break_point(rest, limit);
            out.push(rest[..cut].trim_end().to_string());
            rest = rest[cut..].trim_start();
            if rest.is_empty() {
                break;
            }
        }
    }

    if !chunk.is_empty() {
        out.push(chunk);
    }
    out
}

fn break_point(line: &str, limit: usize) -> usize {
    let mut end = limit.min(line.len());
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    match line[..end].rfind(' ') {
        Some(space) if space > 0 => space + 1,
        _ => end,
    }
}
