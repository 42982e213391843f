use std::{sync::OnceLock, time::Duration};

use regex::Regex;
use reqwest::{header::LOCATION, redirect::Policy, Url};

use crate::{
    domain::{CanonicalRef, PostId},
    errors::Error,
    Result,
};

/// Every known alias of the post host collapses onto this domain.
pub const CANONICAL_DOMAIN: &str = "x.com";

const ALTERNATE_DOMAINS: &[&str] = &[
    "twitter.com",
    "www.twitter.com",
    "mobile.twitter.com",
    "m.twitter.com",
    "www.x.com",
    "mobile.x.com",
];

pub const DEFAULT_SHORTENER_DOMAINS: &[&str] = &["t.co"];

// ============== Normalization ==============

/// Canonicalize a post reference.
///
/// Lower-cases and trims, defaults the scheme to `https`, maps alternate hosts to
/// [`CANONICAL_DOMAIN`], and drops query, fragment, credentials and trailing
/// slashes. `normalize(normalize(x)) == normalize(x)`.
pub fn normalize(reference: &str) -> Result<CanonicalRef> {
    let input = reference.trim().to_lowercase();
    if input.is_empty() {
        return Err(Error::InvalidReference("empty reference".to_string()));
    }
    if input.chars().any(char::is_whitespace) {
        return Err(Error::InvalidReference(format!(
            "reference contains whitespace: {input}"
        )));
    }

    let with_scheme = if input.contains("://") {
        input
    } else {
        format!("https://{input}")
    };

    let url = Url::parse(&with_scheme)
        .map_err(|e| Error::InvalidReference(format!("{with_scheme}: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::InvalidReference(format!(
            "unsupported scheme: {}",
            url.scheme()
        )));
    }

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| Error::InvalidReference(format!("missing host: {with_scheme}")))?;

    let host = canonical_host(host);
    let scheme = if host == CANONICAL_DOMAIN {
        "https"
    } else {
        url.scheme()
    };

    // Default ports are judged against the output scheme, not the input one.
    let default_port = if scheme == "https" { 443 } else { 80 };
    let mut out = format!("{scheme}://{host}");
    if let Some(port) = url.port_or_known_default().filter(|p| *p != default_port) {
        out.push_str(&format!(":{port}"));
    }
    out.push_str(url.path().trim_end_matches('/'));

    // Percent-encoding emits upper-case hex; fold it so a second pass is a no-op.
    Ok(CanonicalRef(out.to_lowercase()))
}

fn canonical_host(host: &str) -> &str {
    if ALTERNATE_DOMAINS.contains(&host) {
        CANONICAL_DOMAIN
    } else {
        host
    }
}

fn status_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^https://x\.com/([a-z0-9_]+)/status/(\d+)(?:/|$)").expect("valid regex")
    })
}

/// Pull the numeric post id out of `x.com/<handle>/status/<id>`.
pub fn extract_id(reference: &CanonicalRef) -> Option<PostId> {
    status_re()
        .captures(reference.as_str())
        .and_then(|caps| caps.get(2))
        .map(|m| PostId(m.as_str().to_string()))
}

// ============== Short Links ==============

/// Normalizes references and expands known short links (one redirect hop).
#[derive(Clone, Debug)]
pub struct UrlNormalizer {
    http: reqwest::Client,
    shortener_domains: Vec<String>,
}

impl UrlNormalizer {
    pub fn new(shortener_domains: Vec<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .redirect(Policy::none())
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("http client build failed: {e}")))?;

        let shortener_domains = shortener_domains
            .into_iter()
            .map(|d| d.trim().to_lowercase())
            .filter(|d| !d.is_empty())
            .collect();

        Ok(Self {
            http,
            shortener_domains,
        })
    }

    pub fn normalize(&self, reference: &str) -> Result<CanonicalRef> {
        normalize(reference)
    }

    pub fn extract_id(&self, reference: &CanonicalRef) -> Option<PostId> {
        extract_id(reference)
    }

    pub fn is_short_link(&self, reference: &str) -> bool {
        Url::parse(reference)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
            .map(|h| self.shortener_domains.iter().any(|d| d == &h))
            .unwrap_or(false)
    }

    /// Follow exactly one redirect for short-link hosts.
    ///
    /// Best-effort: any failure returns the input unchanged.
    pub async fn resolve_short_link(&self, reference: &str) -> String {
        if !self.is_short_link(reference) {
            return reference.to_string();
        }

        let resp = match self.http.get(reference).send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(reference, error = %e, "short link resolution failed");
                return reference.to_string();
            }
        };

        if !resp.status().is_redirection() {
            tracing::debug!(reference, status = %resp.status(), "short link did not redirect");
            return reference.to_string();
        }

        let location = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|loc| resp.url().join(loc).ok());

        match location {
            Some(dest) => {
                tracing::debug!(reference, destination = %dest, "short link resolved");
                dest.to_string()
            }
            None => reference.to_string(),
        }
    }

    /// Normalize, expand a short link if needed, then normalize the destination.
    pub async fn canonicalize(&self, raw: &str) -> Result<CanonicalRef> {
        let first = self.normalize(raw)?;
        if !self.is_short_link(first.as_str()) {
            return Ok(first);
        }
        // Short-link codes are case-sensitive; resolve the caller's spelling.
        let trimmed = raw.trim();
        let original = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("https://{trimmed}")
        };
        let resolved = self.resolve_short_link(&original).await;
        self.normalize(&resolved)
    }
}
