//! Labelwatch - Runs the label sync engine against an in-memory mailbox
//!
//! Drives a short scripted session (gated start, initial load, hydration,
//! local actions, a draft) and prints the resulting folder counts as JSON.
//!
//! Usage: `labelwatch [CONFIG_JSON]`

use anyhow::{Context, Result};
use label_sync::{
    AccountKey, EngineConfig, EventBus, InMemoryLabelSource, LabelId, LabelRecord,
    LifecycleEvent, RefreshOptions, SessionState, SyncEngine,
};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Latency of every simulated remote call
const SIMULATED_LATENCY: Duration = Duration::from_millis(40);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    // Bootstrap config directory
    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    let config = load_config(std::env::args().nth(1).map(PathBuf::from));
    info!(
        "Engine config: ttl {:?}, cooldown {:?}, batch size {}",
        config.ttl, config.cooldown, config.batch_size
    );

    let account = AccountKey::new("demo", "me@example.com");
    let source = Arc::new(sample_source(&account));
    let session = Arc::new(SessionState::new());

    let engine = SyncEngine::builder(source.clone())
        .gate(session.clone())
        .config(config)
        .build()
        .context("Failed to build sync engine")?;

    // Nothing is loaded until the session is ready
    let outcome = engine
        .refresh_labels(&account, RefreshOptions::default())
        .await?;
    info!("Refresh before sign-in: {:?}", outcome);

    session.set_session_established(true);
    session.set_account_selected(true);
    session.set_loading_permitted(true);

    let bus = EventBus::default();
    let listener = engine.attach(&bus);

    let outcome = engine
        .refresh_labels(&account, RefreshOptions::default())
        .await?;
    info!("Initial refresh: {:?}", outcome);

    if let Some(stats) = engine.hydration_settled(&account).await {
        info!(
            "Hydrated {} of {} user label(s) in {}ms",
            stats.hydrated, stats.candidates, stats.duration_ms
        );
    }

    bus.publish(LifecycleEvent::MessageReadStateChanged {
        account: account.clone(),
        label_ids: vec![LabelId::new(LabelId::INBOX), LabelId::new("Label_2")],
        unread: false,
    });
    bus.publish(LifecycleEvent::MessageMoved {
        account: account.clone(),
        from: vec![LabelId::new(LabelId::INBOX)],
        to: vec![LabelId::new("Label_3")],
        unread: true,
    });

    // The server sees the new draft by the time the refresh lands
    source.update_label(
        &account,
        LabelRecord::system(LabelId::DRAFTS, "Drafts")
            .with_messages_total(3)
            .with_threads_total(3),
    );
    bus.publish(LifecycleEvent::DraftCreated {
        account: account.clone(),
    });

    drop(bus);
    if let Err(e) = listener.await {
        warn!("Event listener stopped abnormally: {}", e);
    }

    let report = serde_json::json!({
        "account": account.to_string(),
        "status": engine.status(&account),
        "labels": engine.read_labels(&account),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

/// Load engine config from an explicit file, the shared config dir, or defaults
fn load_config(path: Option<PathBuf>) -> EngineConfig {
    let loaded = match &path {
        Some(path) => EngineConfig::from_file(path),
        None => EngineConfig::load(),
    };
    let config = loaded.unwrap_or_else(|e| {
        warn!("Using default engine config: {:#}", e);
        EngineConfig::default()
    });
    if path.is_none() {
        seed_config(&config);
    }
    config
}

/// Write `config` to the shared config dir unless a file is already there
fn seed_config(config: &EngineConfig) {
    let Some(path) = EngineConfig::default_config_path() else {
        return;
    };
    if path.exists() {
        return;
    }
    match config.save() {
        Ok(()) => info!("Wrote engine config to {}", path.display()),
        Err(e) => warn!("Failed to write engine config: {:#}", e),
    }
}

fn sample_source(account: &AccountKey) -> InMemoryLabelSource {
    let source = InMemoryLabelSource::new();
    source.set_latency(Some(SIMULATED_LATENCY));
    source.set_labels(
        account,
        vec![
            LabelRecord::system(LabelId::INBOX, "Inbox")
                .with_messages_total(120)
                .with_messages_unread(12)
                .with_threads_total(80)
                .with_threads_unread(9),
            LabelRecord::system(LabelId::SENT, "Sent").with_messages_total(64),
            LabelRecord::system(LabelId::DRAFTS, "Drafts")
                .with_messages_total(2)
                .with_threads_total(2),
            LabelRecord::system(LabelId::SPAM, "Spam").with_messages_total(7),
            LabelRecord::new("Label_1", "Receipts").with_messages_total(30),
            LabelRecord::new("Label_2", "Project X").with_messages_total(14),
            LabelRecord::new("Label_3", "Travel").with_messages_total(5),
        ],
    );

    // coarse list counters for user labels lag behind their detail
    for (id, name, total, unread) in [
        ("Label_1", "Receipts", 31, 2),
        ("Label_2", "Project X", 14, 4),
        ("Label_3", "Travel", 5, 1),
    ] {
        source.set_detail(
            account,
            LabelRecord::new(id, name)
                .with_messages_total(total)
                .with_messages_unread(unread)
                .with_threads_total(total)
                .with_threads_unread(unread),
        );
    }
    source
}
