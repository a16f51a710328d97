use std::sync::Arc;
use std::time::Duration;

use inbox_relay::config::{self, RelayConfig};
use inbox_relay::engine::Engine;
use inbox_relay::mailbox::GmailFetcher;
use inbox_relay::notify::WebhookNotifier;
use inbox_relay::window::FileCheckpointStore;
use tracing::error;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let token = std::env::var("RELAY_GMAIL_TOKEN").unwrap_or_else(|_| {
        eprintln!("Error: RELAY_GMAIL_TOKEN not set");
        eprintln!("  export RELAY_GMAIL_TOKEN=ya29....");
        std::process::exit(1);
    });

    let defaults = RelayConfig::default();
    let config = RelayConfig {
        poll_interval_secs: std::env::var("RELAY_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.poll_interval_secs),
        rules_path: std::env::var("RELAY_RULES_PATH")
            .map(Into::into)
            .unwrap_or(defaults.rules_path),
        checkpoint_dir: std::env::var("RELAY_CHECKPOINT_DIR")
            .map(Into::into)
            .unwrap_or(defaults.checkpoint_dir),
    };

    eprintln!("📬 inbox-relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Rules: {}", config.rules_path.display());
    eprintln!("   Checkpoint dir: {}", config.checkpoint_dir.display());
    eprintln!("   Poll interval: {}s\n", config.poll_interval_secs);

    let rules = config::load_rules(&config.rules_path)?;

    let engine = Engine::new(
        Arc::new(GmailFetcher::new(secrecy::SecretString::from(token))),
        Arc::new(WebhookNotifier::new()),
        Arc::new(FileCheckpointStore::new(&config.checkpoint_dir)),
    );

    // One-shot mode for cron-style hosts.
    if std::env::var("RELAY_ONCE").is_ok_and(|v| v == "1") {
        engine.check_mail(&rules).await?;
        return Ok(());
    }

    let mut tick = tokio::time::interval(Duration::from_secs(config.poll_interval_secs));
    loop {
        tick.tick().await;
        if let Err(e) = engine.check_mail(&rules).await {
            error!("Check run failed: {e}");
        }
    }
}
