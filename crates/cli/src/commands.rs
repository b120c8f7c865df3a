// FILE: crates/cli/src/commands.rs

use anyhow::{bail, Context, Result};
use clap::ArgMatches;
use console::style;
use offsync_config::{Config, ConfigManager};
use offsync_sync_engine::{
    DatasetConfig, DatasetManager, EventCode, EventMessage, MemoryRemote, RecordId, ServerStatus,
    SyncEvent,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Write a default config file
pub fn init_config(manager: &ConfigManager) -> Result<()> {
    let created = manager
        .initialize()
        .context("Failed to initialize configuration")?;

    if created {
        println!(
            "{} Config written to {}",
            style("✓").green().bold(),
            manager.config_path().display()
        );
    } else {
        println!(
            "Config already exists at {}",
            manager.config_path().display()
        );
    }
    Ok(())
}

/// Print the effective configuration
pub fn show_config(config: &Config, as_json: bool) -> Result<()> {
    let rendered = if as_json {
        config.to_json_pretty().context("Failed to render config")?
    } else {
        toml::to_string_pretty(config).context("Failed to render config")?
    };
    println!("{}", rendered);
    Ok(())
}

/// Options for the `demo` subcommand
#[derive(Debug, Clone, PartialEq)]
pub struct DemoOptions {
    pub dataset: String,
    pub records: usize,
    pub frequency: Duration,
    pub crash_cycles: u32,
    pub collide: bool,
}

impl DemoOptions {
    pub fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let dataset = matches
            .get_one::<String>("dataset")
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Dataset id is required"))?;
        let seconds = matches.get_one::<f64>("frequency").copied().unwrap_or(0.2);
        let frequency = match Duration::try_from_secs_f64(seconds) {
            Ok(frequency) if !frequency.is_zero() => frequency,
            _ => bail!("Frequency must be a positive number of seconds, got {}", seconds),
        };

        Ok(Self {
            dataset,
            records: matches.get_one::<usize>("records").copied().unwrap_or(3),
            frequency,
            crash_cycles: matches.get_one::<u32>("crash-cycles").copied().unwrap_or(0),
            collide: matches.get_flag("collide"),
        })
    }
}

/// Manage a dataset against an in-memory remote and narrate what happens
pub async fn run_demo(config: &Config, options: DemoOptions) -> Result<()> {
    let remote = Arc::new(MemoryRemote::new());
    let manager = DatasetManager::from_config(config, remote.clone())
        .await
        .context("Failed to start sync manager")?;
    manager.notify(|event| println!("{}", format_event(event)));
    let mut events = manager.subscribe();

    let dataset = options.dataset.as_str();
    let dataset_config = DatasetConfig::from(&config.sync)
        .with_sync_frequency(options.frequency)
        .with_auto_sync(true);

    println!("\n{} {}", style("Managing dataset").bold().cyan(), dataset);
    println!("{}", "=".repeat(80));

    if options.crash_cycles > 0 {
        remote.set_status(ServerStatus::crashed(503));
    }
    manager
        .manage(dataset, Some(dataset_config))
        .await
        .context("Failed to manage dataset")?;

    let mut receipts = Vec::with_capacity(options.records);
    for index in 0..options.records {
        let receipt = manager
            .do_create(
                dataset,
                serde_json::json!({"index": index, "title": format!("record {}", index)}),
            )
            .await
            .context("Failed to create record")?;
        receipts.push(receipt);
    }

    if options.crash_cycles > 0 {
        wait_for_events(&mut events, EventCode::SyncFailed, options.crash_cycles as usize).await;
        println!("{}", style("Remote recovered").yellow());
        remote.set_status(ServerStatus::healthy());
    }

    wait_until_settled(&manager, dataset, options.frequency).await?;

    if options.collide {
        if let Some(first) = receipts.first() {
            provoke_collision(&manager, &remote, dataset, &first.hash).await?;
            wait_for_events(&mut events, EventCode::CollisionDetected, 1).await;
        }
    }

    print_summary(&manager, dataset).await?;
    manager.shutdown().await;
    Ok(())
}

async fn provoke_collision(
    manager: &DatasetManager,
    remote: &MemoryRemote,
    dataset: &str,
    hash: &str,
) -> Result<()> {
    let RecordId::Remote(uid) = manager.get_uid(hash).await else {
        bail!("Record {} was never acknowledged", hash);
    };

    println!("\n{}", style("Editing the same record on both sides").bold());
    remote.update_record(dataset, &uid, serde_json::json!({"title": "remote edit"}));
    manager
        .do_update(dataset, &uid, serde_json::json!({"title": "local edit"}))
        .await
        .context("Failed to update record")?;
    Ok(())
}

async fn wait_for_events(rx: &mut broadcast::Receiver<SyncEvent>, code: EventCode, count: usize) {
    let mut seen = 0;
    let wait = async {
        while seen < count {
            match rx.recv().await {
                Ok(event) if event.code == code => seen += 1,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };
    if tokio::time::timeout(Duration::from_secs(30), wait).await.is_err() {
        log::warn!("Gave up waiting for {} {} events", count, code);
    }
}

async fn wait_until_settled(manager: &DatasetManager, dataset: &str, frequency: Duration) -> Result<()> {
    for _ in 0..50 {
        if manager.get_pending(dataset).await?.is_empty() {
            return Ok(());
        }
        tokio::time::sleep(frequency).await;
    }
    log::warn!("Pending changes did not settle");
    Ok(())
}

async fn print_summary(manager: &DatasetManager, dataset: &str) -> Result<()> {
    let records = manager.do_list(dataset).await?;
    let pending = manager.get_pending(dataset).await?;
    let collisions = manager.list_collisions(dataset).await?;

    println!("\n{}", style("Final state").bold().cyan());
    println!("{}", "=".repeat(80));
    println!("Records: {}", style(records.len()).bold());
    for (uid, record) in &records {
        println!("  {} {}", truncate(uid, 12), record.data);
    }
    println!("Pending: {}", style(pending.len()).bold());
    for (hash, entry) in &pending {
        println!(
            "  {} {} attempts={} crashed={}",
            truncate(hash, 12),
            entry.action,
            entry.attempt_count,
            entry.crashed
        );
    }
    println!("Collisions: {}", style(collisions.len()).bold());
    for (hash, collision) in &collisions {
        println!(
            "  {} on {}: local {} / remote {}",
            truncate(hash, 12),
            truncate(&collision.uid, 12),
            render(collision.local.as_ref()),
            render(collision.remote.as_ref())
        );
    }
    Ok(())
}

/// One line describing a notification
pub fn format_event(event: &SyncEvent) -> String {
    let message = match &event.message {
        EventMessage::None => String::new(),
        EventMessage::Text(text) => text.clone(),
        EventMessage::Applied { action, uid, .. } => format!("{} {}", action, truncate(uid, 12)),
        EventMessage::Collision { uid, hash } => {
            format!("uid {} change {}", truncate(uid, 12), truncate(hash, 12))
        }
    };

    let code = match event.code {
        EventCode::SyncFailed | EventCode::CollisionDetected => style(event.code.as_str()).red(),
        EventCode::SyncComplete | EventCode::RemoteUpdateApplied => {
            style(event.code.as_str()).green()
        }
        EventCode::OfflineUpdate => style(event.code.as_str()).yellow(),
        _ => style(event.code.as_str()).dim(),
    };

    format!("  [{}] {} {}", event.dataset_id, code, message)
        .trim_end()
        .to_string()
}

fn render(value: Option<&serde_json::Value>) -> String {
    value
        .map(|value| value.to_string())
        .unwrap_or_else(|| "(deleted)".to_string())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", &s[..max_len])
    }
}
