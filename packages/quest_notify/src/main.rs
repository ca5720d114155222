use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quest_notify::config::default_config_dir;
use quest_notify::{
    ChannelConfig, Handlers, Notification, NotificationChannel, Session, SessionSync,
};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "quest-notify")]
#[command(about = "Listen for realtime quest notifications")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config directory (defaults to ~/.config/quest-notify)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect with a bearer token and print notifications until Ctrl-C
    Listen(ListenArgs),

    /// Print the resolved configuration as JSON
    Config,
}

#[derive(Parser)]
struct ListenArgs {
    /// Bearer token of the signed-in user
    #[arg(long, env = "QUEST_NOTIFY_TOKEN", hide_env_values = true)]
    token: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.debug {
        "quest_notify=debug,info"
    } else {
        "quest_notify=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let config_dir = cli.config_dir.unwrap_or_else(default_config_dir);
    let config = ChannelConfig::load(&config_dir)?;

    match cli.command {
        Commands::Config => {
            let json = serde_json::to_string_pretty(&config)
                .context("Failed to serialize configuration")?;
            println!("{json}");
            Ok(())
        }
        Commands::Listen(args) => listen(config, args).await,
    }
}

async fn listen(config: ChannelConfig, args: ListenArgs) -> Result<()> {
    info!(url = %config.ws_base_url, "starting notification listener");

    let (session_tx, session_rx) = watch::channel(Session::Absent);
    let channel = NotificationChannel::builder(config)
        .token_source(session_rx.clone())
        .build()?;

    channel.handle().set_handlers(
        Handlers::new()
            .on_notification(|data| match Notification::from_data(data) {
                Some(note) => println!("{}", note.summary()),
                None => println!("{data}"),
            })
            .on_connect(|| info!("connected"))
            .on_disconnect(|frame| info!(close = %frame, "disconnected"))
            .on_error(|err| warn!(error = %err, "socket error")),
    );

    let sync = SessionSync::spawn(channel, session_rx);
    session_tx.send_replace(Session::present(args.token));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("signing out");
    sync.logout();
    session_tx.send_replace(Session::Absent);
    sync.stop().await;
    // Give the close frame a moment to reach the server.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    Ok(())
}
