//! Follow a household's realtime events from the terminal.
//!
//! ```text
//! homesync-tail <household-id> [--config <path>]
//! ```
//!
//! The token is read from `HOMESYNC_TOKEN`, falling back to the keyring
//! entry named in the config. Every event is logged until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::Utc;
use homesync::cache::MemoryQueryCache;
use homesync::credentials::{KeyringTokenStore, StaticTokenStore, TokenStore};
use homesync::realtime::{EventKind, SyncClient, SyncEvent, WebSocketTransport};
use homesync::reminders::{MemoryReminderScheduler, sync_reminders};
use homesync::{SyncConfig, logging};

struct Args {
    household_id: String,
    config: Option<PathBuf>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut household_id = None;
    let mut config = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                config = Some(PathBuf::from(
                    args.next().context("--config needs a path")?,
                ));
            }
            "--help" | "-h" => {
                println!("usage: homesync-tail <household-id> [--config <path>]");
                std::process::exit(0);
            }
            other if household_id.is_none() => household_id = Some(other.to_owned()),
            other => bail!("unexpected argument {other:?}"),
        }
    }
    Ok(Args {
        household_id: household_id.context("missing <household-id>")?,
        config,
    })
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<SyncConfig> {
    let path = path.unwrap_or_else(SyncConfig::default_config_path);
    if path.exists() {
        SyncConfig::from_file(&path).with_context(|| format!("loading {}", path.display()))
    } else {
        Ok(SyncConfig::default())
    }
}

fn describe(event: &SyncEvent) -> String {
    match event {
        SyncEvent::TaskCreated(c) | SyncEvent::TaskUpdated(c) => {
            format!("{} ({})", c.task.title, c.task.id)
        }
        SyncEvent::TaskDeleted(d) => d.task_id.clone(),
        SyncEvent::TaskCompleted(c) => format!(
            "{} by {}",
            c.task.title,
            c.completed_by.as_ref().map_or("someone", |u| u.name.as_str())
        ),
        SyncEvent::TaskAssigned(c) | SyncEvent::TaskUnassigned(c) => format!(
            "{} / {}",
            c.task.title,
            c.member.as_ref().map_or("?", |u| u.name.as_str())
        ),
        SyncEvent::HouseholdUpdated(c) => c.household.name.clone(),
        SyncEvent::MemberJoined(j) => j.user.name.clone(),
        SyncEvent::MemberLeft(l) => l.user_id.clone(),
        SyncEvent::InviteCodeRefreshed(r) => r.invite_code.clone(),
        SyncEvent::UserUpdated(u) => u.user.name.clone(),
        SyncEvent::Disconnect(d) => format!("{} ({:?})", d.reason, d.code),
        SyncEvent::ConnectError(f) => f.error.to_string(),
        SyncEvent::Connect | SyncEvent::Reconnect => String::new(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args()?;
    let config = load_config(args.config)?;
    let _log_guard = logging::init(&config.logging)?;

    let tokens: Arc<dyn TokenStore> = match std::env::var("HOMESYNC_TOKEN") {
        Ok(token) if !token.is_empty() => Arc::new(StaticTokenStore::new(Some(token))),
        _ => Arc::new(KeyringTokenStore::from_config(&config.credentials)),
    };
    let cache = Arc::new(MemoryQueryCache::new());
    let reminders = Arc::new(MemoryReminderScheduler::new());

    let client = SyncClient::new(
        config,
        tokens,
        cache.clone(),
        Arc::new(WebSocketTransport::new()),
    );

    for kind in EventKind::ALL {
        client.subscribe(kind, |event| {
            tracing::info!(kind = %event.kind(), "{}", describe(event));
            Ok(())
        });
    }

    // Keep local reminders in step with the reconciled task list.
    let household_id = args.household_id.clone();
    for kind in [
        EventKind::TaskCreated,
        EventKind::TaskUpdated,
        EventKind::TaskDeleted,
        EventKind::TaskCompleted,
    ] {
        let cache = cache.clone();
        let reminders = reminders.clone();
        let household_id = household_id.clone();
        client.subscribe(kind, move |_| {
            if let Some(tasks) = cache.tasks(&household_id) {
                let report = sync_reminders(reminders.as_ref(), &tasks, Utc::now());
                tracing::debug!(pending = reminders.len(), scheduled = report.scheduled.len(), "reminders");
            }
            Ok(())
        });
    }

    client.join_room(&args.household_id)?;
    if let Err(e) = client.connect().await {
        tracing::error!(error = %e, "initial connect failed");
        if matches!(e, homesync::SyncError::AuthMissing) {
            bail!("no token: set HOMESYNC_TOKEN or store one in the keyring");
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;

    tracing::info!("shutting down");
    client.disconnect().await?;
    client.shutdown();
    Ok(())
}
