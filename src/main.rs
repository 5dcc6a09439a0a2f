mod api;
mod gateway;

use chrono::Utc;
use clap::{Parser, Subcommand};
use haven_channels::{resend::ResendChannel, twilio::TwilioChannel, EMAIL, SMS};
use haven_core::{config, traits::Channel};
use haven_memory::Store;
use std::collections::HashMap;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(
    name = "haven",
    version,
    about = "Haven: caregiver safety monitoring and escalation"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file.
    #[arg(short, long, env = "HAVEN_CONFIG", default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway: API, scheduler loop and watchers.
    Start,
    /// Show configuration and open alert counts.
    Status,
    /// Run one watcher pass now and print its summary.
    Watch {
        #[command(subcommand)]
        watcher: Watcher,
    },
    /// List unresolved alerts, newest first.
    Alerts {
        #[arg(short, long, default_value_t = 50)]
        limit: i64,
    },
    /// Mark an alert resolved.
    Resolve {
        /// Alert id.
        id: String,
    },
}

#[derive(Subcommand)]
enum Watcher {
    Engagement,
    Wellness,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load(&cli.config)?;

    let log_dir = matches!(cli.command, Commands::Start)
        .then(|| format!("{}/logs", config::shellexpand(&cfg.haven.data_dir)));
    let _guard = init_tracing(&cfg.haven.log_level, log_dir.as_deref())?;

    match cli.command {
        Commands::Start => {
            let gw = Arc::new(build_gateway(&cfg).await?);
            if !gw.has_channel(SMS) {
                anyhow::bail!(
                    "Twilio SMS is not enabled. Set [channel.twilio] in config.toml \
                     or the TWILIO_* env vars."
                );
            }
            println!("{}: starting safety monitor...", cfg.haven.name);
            gw.run().await?;
        }
        Commands::Status => {
            println!("{} status\n", cfg.haven.name);
            println!("Config: {}", cli.config);
            println!("Database: {}", config::shellexpand(&cfg.memory.db_path));
            println!("Default provider: {}", cfg.provider.default);
            println!();

            let twilio = cfg.channel.twilio.as_ref();
            println!(
                "  sms (twilio): {}",
                match twilio {
                    Some(t) if t.enabled && !t.account_sid.is_empty() => "configured",
                    Some(t) if t.enabled => "enabled but missing account_sid",
                    _ => "disabled",
                }
            );
            let resend = cfg.channel.resend.as_ref();
            println!(
                "  email (resend): {}",
                match resend {
                    Some(r) if r.enabled && !r.api_key.is_empty() => "configured",
                    Some(r) if r.enabled => "enabled but missing api_key",
                    _ => "disabled",
                }
            );
            println!(
                "  scheduler: {} (every {}s)",
                on_off(cfg.scheduler.enabled),
                cfg.scheduler.poll_interval_secs
            );
            println!(
                "  watchers: {} (engagement every {}m, wellness every {}h)",
                on_off(cfg.watchers.enabled),
                cfg.watchers.engagement_interval_minutes,
                cfg.watchers.wellness_interval_hours
            );
            println!(
                "  api: {} ({}:{})",
                on_off(cfg.api.enabled),
                cfg.api.host,
                cfg.api.port
            );
            println!();

            let store = Store::new(&cfg.memory).await?;
            let counts = store.alert_counts().await?;
            if counts.is_empty() {
                println!("Open alerts: none");
            } else {
                println!("Open alerts:");
                for (alert_type, n) in counts {
                    println!("  {alert_type}: {n}");
                }
            }
        }
        Commands::Watch { watcher } => {
            let gw = build_gateway(&cfg).await?;
            let summary = match watcher {
                Watcher::Engagement => {
                    serde_json::to_value(gw.run_engagement_watch(Utc::now()).await?)?
                }
                Watcher::Wellness => serde_json::to_value(gw.run_wellness_watch(Utc::now()).await?)?,
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Alerts { limit } => {
            let store = Store::new(&cfg.memory).await?;
            let alerts = store.list_unresolved_alerts(limit.max(1)).await?;
            if alerts.is_empty() {
                println!("No unresolved alerts.");
            }
            for alert in alerts {
                println!(
                    "{}  {:<8}  {}/{}  user={}  {}",
                    alert.id,
                    alert.severity.as_str(),
                    alert.alert_type.as_str(),
                    alert.pattern.as_str(),
                    alert.user_id,
                    alert.message
                );
            }
        }
        Commands::Resolve { id } => {
            let store = Store::new(&cfg.memory).await?;
            if store.get_alert(&id).await?.is_none() {
                anyhow::bail!("alert {id} not found");
            }
            if store
                .resolve_alert(&id, haven_core::clock::to_ms(Utc::now()))
                .await?
            {
                println!("Resolved {id}");
            } else {
                println!("{id} was already resolved");
            }
        }
    }

    Ok(())
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "enabled"
    } else {
        "disabled"
    }
}

/// Console logging, plus a daily-rolled file under `log_dir` when given.
/// `RUST_LOG` overrides the configured level.
fn init_tracing(level: &str, log_dir: Option<&str>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let Some(dir) = log_dir else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
        return Ok(None);
    };

    std::fs::create_dir_all(dir)?;
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "haven.log"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .init();
    Ok(Some(guard))
}

/// Wire the provider, the enabled channels and the store into a gateway.
async fn build_gateway(cfg: &config::Config) -> anyhow::Result<gateway::Gateway> {
    let provider = haven_providers::build_provider(&cfg.provider)?;

    let mut channels: HashMap<String, Arc<dyn Channel>> = HashMap::new();

    if let Some(ref tw) = cfg.channel.twilio {
        if tw.enabled {
            if tw.account_sid.is_empty() || tw.auth_token.is_empty() || tw.from_number.is_empty() {
                anyhow::bail!(
                    "Twilio is enabled but account_sid, auth_token or from_number is empty. \
                     Set them in config.toml or the TWILIO_* env vars."
                );
            }
            haven_channels::twilio::describe(tw);
            channels.insert(SMS.to_string(), Arc::new(TwilioChannel::new(tw.clone())));
        }
    }

    if let Some(ref rs) = cfg.channel.resend {
        if rs.enabled {
            if rs.api_key.is_empty() {
                anyhow::bail!(
                    "Resend is enabled but api_key is empty. \
                     Set it in config.toml or the RESEND_API_KEY env var."
                );
            }
            channels.insert(EMAIL.to_string(), Arc::new(ResendChannel::new(rs.clone())));
        }
    }

    if !channels.contains_key(EMAIL) {
        tracing::warn!("email channel disabled; emergency contacts will not be notified");
    }

    let memory = Store::new(&cfg.memory).await?;
    Ok(gateway::Gateway::new(provider, channels, memory, cfg))
}
