use anyhow::{bail, Context, Result};
use itsm_bridge::config::{generate_secret, load_config, new_shared_config};
use itsm_bridge::kvstore::{KvStore, SqliteKvStore};
use itsm_bridge::oauth::TokenLifecycle;
use itsm_bridge::servicenow::{
    build_http_client, enrich_and_filter, EnrichmentOptions, SubscriptionQuery,
};
use std::sync::Arc;
use tracing::{info, warn};

const USAGE: &str = "usage: itsm-bridge check <platform-user-id> | itsm-bridge generate-secret";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "itsm_bridge=info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("check") => {
            let user_id = args.next().context(USAGE)?;
            check(&user_id).await
        }
        Some("generate-secret") => {
            println!("{}", generate_secret());
            Ok(())
        }
        _ => bail!(USAGE),
    }
}

/// Connects as `user_id` and lists their enriched subscriptions.
async fn check(user_id: &str) -> Result<()> {
    let path = std::env::var("ITSM_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let config = load_config(&path)?;
    config.validate()?;

    info!(
        config = %path,
        encryption = !config.encryption_disabled(),
        "ITSM bridge starting"
    );

    let store = Arc::new(SqliteKvStore::new(&config.storage.db_path)?);
    let purged = store.cleanup_expired()?;
    if purged > 0 {
        info!(purged, "Removed expired entries");
    }

    let http = build_http_client(&config.http)?;
    let lifecycle = TokenLifecycle::new(new_shared_config(config.clone()), http, store);

    let client = lifecycle
        .client_for(user_id)
        .await
        .with_context(|| format!("Failed to build a client for user {}", user_id))?;

    match client
        .activate_subscriptions(&config.platform.site_url, &config.security.webhook_secret)
        .await
    {
        Ok(status) => info!(status = %status, "Subscriptions are active"),
        Err(e) if e.needs_admin_action() => {
            warn!(error = %e, "Subscriptions need to be set up by an administrator");
            return Ok(());
        }
        Err(e) => return Err(e).context("Failed to verify subscriptions"),
    }

    let query = SubscriptionQuery {
        user_id: user_id.to_string(),
        server_url: config.platform.site_url.clone(),
        limit: config.subscriptions.page_size(None),
        ..Default::default()
    };
    let (subscriptions, _) = client
        .get_all_subscriptions(&query)
        .await
        .context("Failed to list subscriptions")?;

    let options = EnrichmentOptions::from(&config.subscriptions);
    let subscriptions = enrich_and_filter(&client, subscriptions, &options).await;

    info!(count = subscriptions.len(), "Subscriptions");
    for sub in &subscriptions {
        info!(
            id = %sub.id,
            channel_id = %sub.channel_id,
            kind = sub.kind.as_str(),
            record_type = %sub.record_type,
            number = %sub.number,
            short_description = %sub.short_description,
            events = %sub.subscription_events,
            "Subscription"
        );
    }

    Ok(())
}
