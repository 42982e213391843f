use std::collections::BTreeSet;

use serde::Serialize;

use crate::{
    domain::{AccountId, CanonicalRef, CommenterSet},
    session::{Comparison, Session},
    Result,
};

/// Commenters of the main post missing from one comparison post.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DiffEntry {
    pub compared_with: CanonicalRef,
    /// Sorted so rendering is stable.
    pub unique_commenters: BTreeSet<AccountId>,
}

impl DiffEntry {
    pub fn count(&self) -> usize {
        self.unique_commenters.len()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DiffReport {
    pub main_post: CanonicalRef,
    pub main_commenters: usize,
    pub entries: Vec<DiffEntry>,
}

impl DiffReport {
    /// Compact JSON form, used for structured logs.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// `main \ other`: every account in `main` that is absent from `other`.
pub fn unique_commenters(main: &CommenterSet, other: &CommenterSet) -> BTreeSet<AccountId> {
    main.difference(other).cloned().collect()
}

pub fn diff(
    main_post: &CanonicalRef,
    main: &CommenterSet,
    comparisons: &[Comparison],
) -> DiffReport {
    let entries = comparisons
        .iter()
        .map(|c| DiffEntry {
            compared_with: c.post.clone(),
            unique_commenters: unique_commenters(main, &c.commenters),
        })
        .collect();

    DiffReport {
        main_post: main_post.clone(),
        main_commenters: main.len(),
        entries,
    }
}

/// Build the report for a finished session.
///
/// `None` unless the main post is collected and at least one comparison exists.
pub fn diff_session(session: &Session) -> Option<DiffReport> {
    let main = session.main.as_ref()?;
    if session.comparisons.is_empty() {
        return None;
    }
    Some(diff(&main.post, &main.commenters, &session.comparisons))
}
