use anyhow::Context;
use espejo::config::{SyncConfig, SyncScope, CONFIG_FILE, STATE_DIR};
use espejo::domain::SyncEvent;
use espejo::engine::{Lockfile, SyncEngine};
use espejo::hierarchy::ignore::IgnoreSet;
use espejo::remote::{HttpRemote, XhtmlConverter};
use espejo::sources::{webhook, LocalWatcher, Poller, WebhookFilter, WebhookState};
use espejo::store::SqliteStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // environment first, so ESPEJO_* overrides reach the config loader
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("ESPEJO_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let workdir = std::env::current_dir().context("cannot determine working directory")?;
    let config = Arc::new(SyncConfig::load(&workdir)?);

    std::fs::create_dir_all(&config.state_dir)
        .with_context(|| format!("cannot create {}", config.state_dir.display()))?;
    if !config.state_dir.join(CONFIG_FILE).exists() {
        config.persist()?;
    }

    let store = Arc::new(SqliteStore::open(&config.state_dir).await?);
    let remote = Arc::new(HttpRemote::new(config.base_url.clone(), config.token.clone())?);
    let converter = Arc::new(XhtmlConverter);
    let ignore = Arc::new(IgnoreSet::load(&workdir, STATE_DIR));

    let lock = Lockfile::acquire(config.lock_path())?;

    let engine = Arc::new(SyncEngine::new(
        store.clone(),
        remote.clone(),
        converter,
        config.clone(),
    ));

    // surface the reconciliation event stream in the log
    let mut event_rx = engine.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv().await {
            match event {
                SyncEvent::Pull { page_id, path } => info!(%page_id, %path, "pull"),
                SyncEvent::Push { page_id, path } => info!(%page_id, %path, "push"),
                SyncEvent::Conflict { page_id, reason } => warn!(%page_id, %reason, "conflict"),
                SyncEvent::Error { page_id, message } => {
                    error!(page_id = page_id.as_deref().unwrap_or("-"), %message, "sync error")
                }
                SyncEvent::Status { message } => info!(%message, "status"),
            }
        }
    });

    engine.initial_sync(&ignore).await?;

    // warm the user cache so audits can classify contributor activity
    match engine.refresh_user_cache().await {
        Ok(n) if n > 0 => info!(users = n, "user cache refreshed"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "user cache refresh failed"),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // remote events: poller plus (optionally) the webhook receiver
    let (remote_tx, mut remote_rx) = mpsc::channel(256);
    let poller = Poller::new(
        remote.clone(),
        config.scope.clone(),
        Duration::from_secs(config.poll_interval_secs),
        remote_tx.clone(),
    );
    tokio::spawn(poller.run(shutdown_rx.clone()));

    if let Some(port) = config.webhook_port {
        let filter = match &config.scope {
            SyncScope::Page { page_id } => WebhookFilter::Page(page_id.clone()),
            _ => WebhookFilter::Space(config.space_key.clone()),
        };
        let state = WebhookState { filter, events: remote_tx.clone() };
        let rx = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = webhook::serve(port, state, rx).await {
                error!(error = %e, "webhook receiver failed");
            }
        });

        if let Some(callback) = &config.webhook_callback_url {
            use espejo::remote::RemoteClient;
            if let Err(e) = remote.register_webhook(callback).await {
                warn!(error = %e, "webhook registration failed; relying on polling");
            }
        }
    }

    // local events: the debounced directory watcher
    let (local_tx, mut local_rx) = mpsc::channel(256);
    let watcher = LocalWatcher::spawn(workdir.clone(), ignore.clone(), store.clone(), local_tx)?;

    // feed both streams into the keyed reconciliation queue
    let feeder = engine.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(event) = remote_rx.recv() => feeder.enqueue_remote(event).await,
                Some(event) = local_rx.recv() => feeder.enqueue_local(event).await,
                else => break,
            }
        }
    });

    let worker = tokio::spawn(engine.clone().run_worker(shutdown_rx.clone()));

    info!(workdir = %workdir.display(), "espejo daemon running");
    wait_for_shutdown().await;
    info!("shutting down");

    let _ = shutdown_tx.send(true);
    watcher.shutdown().await;
    let _ = worker.await;
    lock.release();

    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("cannot install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
