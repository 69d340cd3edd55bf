//! `roam`: terminal harness for the direct-message layer.
//!
//! ```bash
//! # Chat with bob (type /help inside)
//! roam --user alice chat bob
//!
//! # Same, against an in-process store
//! roam --user alice chat bob --offline
//!
//! # Drop expired cached messages once / keep sweeping
//! roam --user alice purge
//! roam --user alice sweep
//!
//! # Inspect or change local storage preferences
//! roam --user alice prefs --auto-delete true
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use roam_cache::{LocalCache, run_retention_loop};
use roam_session::{ChatConfig, Composer, SessionController, SessionNotice, SubmitOutcome, Subscriber};
use roam_store::{ConversationStore, GatewayPush, HttpStore, MemoryStore, PushChannel, PushStream, StoreClient};
use roam_types::{ChatError, ChatResult, ConversationId, Message};

#[derive(Parser)]
#[command(name = "roam")]
#[command(about = "Direct messages with retry, live updates and an encrypted local cache")]
struct Cli {
    /// Local user id (overrides ROAM_USER_ID)
    #[arg(short, long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a conversation and chat from stdin
    Chat {
        counterpart: String,

        /// Use an in-process store instead of ROAM_STORE_URL
        #[arg(long)]
        offline: bool,
    },

    /// Remove expired messages from the local cache once
    Purge,

    /// Keep purging on ROAM_RETENTION_SWEEP_SECS until interrupted
    Sweep,

    /// Show or change local storage preferences
    Prefs {
        #[arg(long)]
        local_storage: Option<bool>,

        #[arg(long)]
        auto_delete: Option<bool>,

        #[arg(long)]
        timeout_days: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Loads .env as well, so RUST_LOG from there applies below.
    let config = ChatConfig::from_env_overriding(|key: &str| match key {
        "ROAM_USER_ID" => cli.user.clone(),
        _ => None,
    })?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roam=info,roam_session=debug".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cache = Arc::new(
        LocalCache::open(&config.cache_path)
            .with_context(|| format!("opening cache {}", config.cache_path.display()))?,
    );

    match cli.command {
        Commands::Chat {
            counterpart,
            offline,
        } => chat(&config, cache, &counterpart, offline).await,
        Commands::Purge => {
            let report = cache.purge_expired(&config.user_id)?;
            println!(
                "Removed {} messages and {} conversations from the local cache",
                report.messages_removed, report.buckets_removed
            );
            Ok(())
        }
        Commands::Sweep => {
            info!(
                "Sweeping cache for {} every {:?}",
                config.user_id, config.retention_sweep_interval
            );
            tokio::select! {
                _ = run_retention_loop(cache, vec![config.user_id.clone()], config.retention_sweep_interval) => {}
                _ = tokio::signal::ctrl_c() => info!("Interrupted"),
            }
            Ok(())
        }
        Commands::Prefs {
            local_storage,
            auto_delete,
            timeout_days,
        } => {
            let mut prefs = cache.preferences(&config.user_id)?;
            if local_storage.is_some() || auto_delete.is_some() || timeout_days.is_some() {
                if let Some(v) = local_storage {
                    prefs.use_local_storage = v;
                }
                if let Some(v) = auto_delete {
                    prefs.auto_delete_after_sync = v;
                }
                if let Some(days) = timeout_days {
                    prefs.local_storage_timeout = days_to_duration(days);
                }
                cache.set_preferences(&config.user_id, &prefs)?;
            }
            println!("use_local_storage      = {}", prefs.use_local_storage);
            println!("auto_delete_after_sync = {}", prefs.auto_delete_after_sync);
            println!(
                "local_storage_timeout  = {} days",
                prefs.local_storage_timeout.as_secs() / SECS_PER_DAY
            );
            Ok(())
        }
    }
}

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Clamps instead of overflowing on absurd day counts.
fn days_to_duration(days: u64) -> Duration {
    Duration::from_secs(days.saturating_mul(SECS_PER_DAY))
}

/// Push channel used when no gateway is configured: always degraded.
struct NoGateway;

#[async_trait]
impl PushChannel for NoGateway {
    async fn open(&self, _conversation_id: &ConversationId) -> ChatResult<PushStream> {
        Err(ChatError::SubscribeFailed("ROAM_GATEWAY_URL is not set".into()))
    }
}

fn build_controller(config: &ChatConfig, offline: bool) -> Result<SessionController> {
    let store: Arc<dyn ConversationStore>;
    let push: Arc<dyn PushChannel>;
    if offline {
        let memory = MemoryStore::new();
        store = Arc::new(memory.clone());
        push = Arc::new(memory);
    } else {
        store = Arc::new(HttpStore::new(
            config.store_url.clone(),
            config.auth_token.clone(),
            config.request_timeout,
        )?);
        push = match &config.gateway_url {
            Some(url) => Arc::new(GatewayPush::new(url.clone(), config.auth_token.clone())) as Arc<dyn PushChannel>,
            None => Arc::new(NoGateway) as Arc<dyn PushChannel>,
        };
    }

    Ok(SessionController::new(
        StoreClient::new(store, config.user_id.clone()),
        Subscriber::new(push),
    )
    .with_bootstrap_policy(config.bootstrap))
}

fn print_message(message: &Message) {
    println!(
        "[{}] {}: {}",
        message.sent_at.format("%H:%M"),
        message.sender_id,
        message.body
    );
}

const HELP: &str = "/retry  reconnect after a failed open\n\
/refresh  fetch messages missed without live updates\n\
/resend  send the last failed draft again\n\
/quit  leave";

async fn chat(config: &ChatConfig, cache: Arc<LocalCache>, counterpart: &str, offline: bool) -> Result<()> {
    let controller = build_controller(config, offline)?.with_cache(cache.clone());
    let mut notices = controller.notices();

    let sweep = tokio::spawn(run_retention_loop(
        cache,
        vec![config.user_id.clone()],
        config.retention_sweep_interval,
    ));

    match controller.open(counterpart).await {
        Ok(()) => controller.messages().iter().for_each(print_message),
        Err(e) => eprintln!("Could not open conversation: {e} (type /retry)"),
    }

    let mut composer = Composer::with_policy(config.send);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "" => {}
                    "/quit" => break,
                    "/help" => println!("{HELP}"),
                    "/retry" => match controller.retry().await {
                        Ok(()) => controller.messages().iter().for_each(print_message),
                        Err(e) => eprintln!("Retry failed: {e}"),
                    },
                    "/refresh" => match controller.refresh().await {
                        Ok(0) => {}
                        Ok(_) => controller.messages().iter().for_each(print_message),
                        Err(e) => eprintln!("Refresh failed: {e}"),
                    },
                    "/resend" => {
                        if composer.can_submit() {
                            let outcome = composer.submit(&controller).await;
                            report(&controller, outcome);
                        }
                    }
                    _ => {
                        composer.set_draft(line.clone());
                        let outcome = composer.submit(&controller).await;
                        report(&controller, outcome);
                    }
                }
            }
            notice = notices.recv() => match notice {
                Ok(SessionNotice::MessageReceived(message)) => print_message(&message),
                Ok(SessionNotice::SendFailed { attempts, draft }) => {
                    eprintln!("Not sent after {attempts} attempts: {draft:?} (type /resend)");
                }
                Ok(SessionNotice::InitializationFailed { reason }) => {
                    eprintln!("Connection problem: {reason}");
                }
                Ok(SessionNotice::HistoryFailed { reason, .. }) => {
                    eprintln!("History unavailable, showing cached messages: {reason}");
                }
                Ok(SessionNotice::SubscribeFailed { reason, .. }) => {
                    eprintln!("Live updates off, use /refresh: {reason}");
                }
                Err(RecvError::Lagged(n)) => warn!("Skipped {} notices", n),
                Err(RecvError::Closed) => break,
            },
        }
    }

    controller.close().await;
    sweep.abort();
    Ok(())
}

/// Echo our own sent message; the push feed never does.
fn report(controller: &SessionController, outcome: SubmitOutcome) {
    let SubmitOutcome::Sent { attempts } = outcome else {
        return;
    };
    if attempts > 1 {
        info!("Sent after {} attempts", attempts);
    }
    let messages = controller.messages();
    if let Some(message) = messages.iter().rev().find(|m| m.is_from(controller.user_id())) {
        print_message(message);
    }
}
