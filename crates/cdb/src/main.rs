use std::sync::Arc;

use cdb_core::{
    collector::{CollectorConfig, CommenterCollector},
    config::Config,
    machine::SessionMachine,
    normalizer::UrlNormalizer,
    rate_limit::RateLimiter,
    session::SessionStore,
};

use cdb_x::{XClient, XConfig};

#[tokio::main]
async fn main() -> Result<(), cdb_core::Error> {
    cdb_core::logging::init("cdb")?;

    let cfg = Arc::new(Config::load()?);
    tracing::info!(
        api = %cfg.x_api_base_url,
        rate_limit = cfg.rate_limit_enabled,
        max_requests = cfg.rate_limit_requests,
        window_s = cfg.rate_limit_window.as_secs(),
        "configuration loaded"
    );

    let limiter = Arc::new(RateLimiter::new(
        cfg.rate_limit_enabled,
        cfg.rate_limit_requests,
        cfg.rate_limit_window,
    ));
    let normalizer = Arc::new(UrlNormalizer::new(
        cfg.shortener_domains.clone(),
        cfg.http_timeout,
    )?);
    let source = Arc::new(XClient::new(XConfig::from(cfg.as_ref()))?);
    let collector = Arc::new(CommenterCollector::new(
        source,
        limiter,
        CollectorConfig {
            quota_cooldown: cfg.quota_cooldown,
        },
    ));

    let machine = Arc::new(SessionMachine::new(
        Arc::new(SessionStore::new()),
        normalizer,
        collector,
    ));

    cdb_telegram::router::run(cfg, machine)
        .await
        .map_err(|e| cdb_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
