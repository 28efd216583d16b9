//! # forum-warden
//!
//! Assembles the plugins, then runs the review loop and the command loop
//! side by side until Ctrl+C or SIGTERM.

use anyhow::Context;
use fw_config::WardenConfig;
use fw_core::{ForumClient, ImageInspector, RecordStore, TrustRegistry, UserId};
use fw_dispatch::{CommandLoop, Dispatcher};
use fw_engine::{
    Classifier, ClassifierSettings, Enforcer, EnforcerSettings, RestoreSchedule, ReviewLoop, ReviewLoopSettings,
    Reviewer, WatchedForum,
};
use fw_forum_http::HttpForumClient;
use fw_imaging::LocalImageInspector;
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "store-sqlite")]
use fw_store::{SqliteStore, SqliteStoreOptions};

#[cfg(not(feature = "store-sqlite"))]
use fw_store::MemoryStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = WardenConfig::load_from_env().context("loading configuration")?;
    init_tracing(&config);
    match std::env::var(fw_config::CONFIG_PATH_VAR) {
        Ok(path) => tracing::info!(%path, forums = config.forums.len(), "Configuration loaded"),
        Err(_) => tracing::info!(forums = config.forums.len(), "Configuration loaded from environment"),
    }

    // 1. Record store
    #[cfg(feature = "store-sqlite")]
    let store: Arc<dyn RecordStore> = {
        let options = SqliteStoreOptions {
            max_connections: config.store.max_connections,
            connect_timeout: Duration::from_secs(config.store.connect_timeout_secs),
            reconnect_attempts: config.store.reconnect_attempts,
            reconnect_backoff: Duration::from_millis(config.store.reconnect_backoff_ms),
        };
        Arc::new(SqliteStore::new(&config.store.url, options).await.context("opening record store")?)
    };

    #[cfg(not(feature = "store-sqlite"))]
    let store: Arc<dyn RecordStore> = {
        tracing::warn!("Built without store-sqlite, records are kept in memory only");
        Arc::new(MemoryStore::new())
    };

    // 2. Forum gateway and image primitives
    let token = std::mem::replace(&mut config.forum_api.token, SecretString::from(String::new()));
    let client: Arc<dyn ForumClient> = Arc::new(
        HttpForumClient::new(
            &config.forum_api.base_url,
            token,
            config.forum_api.connect_timeout(),
            config.forum_api.read_timeout(),
        )
        .context("building forum client")?,
    );
    let inspector: Arc<dyn ImageInspector> = Arc::new(LocalImageInspector::new());

    seed_operators(&config, store.as_ref()).await;

    // 3. Pipeline
    let classifier = Arc::new(Classifier::new(ClassifierSettings::from(&config.review)).context("compiling rules")?);
    let enforcer = Arc::new(Enforcer::new(client.clone(), store.clone(), EnforcerSettings::from(&config.review)));
    let reviewer = Arc::new(Reviewer::new(
        client.clone(),
        store.clone(),
        inspector.clone(),
        classifier,
        enforcer.clone(),
    ));
    let restore = Arc::new(RestoreSchedule::new(client.clone(), store.clone()));

    let review_loop = ReviewLoop::new(
        reviewer,
        restore,
        store.clone(),
        enforcer.clone(),
        config
            .forums
            .iter()
            .map(|f| WatchedForum { name: f.name.clone(), busy_hours: f.busy_hours })
            .collect(),
        ReviewLoopSettings {
            interval: Duration::from_secs(config.review.interval_secs),
            sweep_interval: Duration::from_secs(config.review.sweep_interval_secs),
            retention: chrono::Duration::days(config.review.retention_days),
        },
    );

    let dispatcher = Arc::new(Dispatcher::new(
        client.clone(),
        store.clone(),
        inspector,
        enforcer,
        &config.forums,
        &config.commands,
    ));
    let command_loop = CommandLoop::new(client, dispatcher, &config.commands);

    // 4. Run until told to stop
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let review_handle = tokio::spawn(review_loop.run(shutdown_rx.clone()));
    let command_handle = tokio::spawn(command_loop.run(shutdown_rx));

    tracing::info!(forums = config.forums.len(), "forum-warden running");

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    for (name, handle) in [("review", review_handle), ("command", command_handle)] {
        if let Err(e) = handle.await {
            tracing::error!(task = name, error = %e, "Loop task ended abnormally");
        }
    }

    tracing::info!("forum-warden stopped");
    Ok(())
}

fn init_tracing(config: &WardenConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.log.level.clone().into());

    if config.log.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Writes configured operators into the trust registry. Rows already at a
/// higher tier are left alone.
async fn seed_operators(config: &WardenConfig, store: &dyn RecordStore) {
    for forum in &config.forums {
        for seed in &forum.operators {
            let user = UserId(seed.user_id);
            let current = match store.user_trust(&forum.name, user).await {
                Ok(row) => row.map(|r| r.tier).unwrap_or_default(),
                Err(e) => {
                    tracing::warn!(forum = %forum.name, user_id = %user, error = %e, "Could not read operator");
                    continue;
                }
            };
            if current >= seed.tier {
                continue;
            }
            match store.set_user_trust(&forum.name, user, seed.tier, "seeded").await {
                Ok(()) => tracing::info!(forum = %forum.name, user_id = %user, tier = %seed.tier, "Seeded operator"),
                Err(e) => tracing::warn!(forum = %forum.name, user_id = %user, error = %e, "Could not seed operator"),
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received terminate signal, shutting down"),
    }
}
