//! Process-supervisor entry point: loads config, registers the channel
//! handlers, and runs the inbound router and outbound dispatcher together.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use courier_channels::bluesms::BlueSmsHandler;
use courier_channels::chirp::ChirpHandler;
use courier_channels::rocketchat::RocketChatHandler;
use courier_channels::startmobile::StartMobileHandler;
use courier_channels::telegram::TelegramHandler;
use courier_channels::whatsapp_cloud::WhatsAppCloudHandler;
use courier_channels::HandlerRegistry;
use courier_core::backend::Backend;
use courier_core::config::Config;
use courier_server::ServerState;

#[derive(Parser)]
#[command(
    name = "courier",
    about = "Message relay between a messaging engine and external providers",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (TOML)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the inbound router and outbound dispatcher
    Serve {
        /// Port to listen on, overriding config
        #[arg(long)]
        port: Option<u16>,
    },

    /// Show the resolved configuration
    Config,

    /// List registered channel types
    Channels,
}

/// Build the handler registry with every channel type this binary carries.
fn register_handlers() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(BlueSmsHandler::new()));
    registry.register(Arc::new(ChirpHandler::new()));
    registry.register(Arc::new(StartMobileHandler::new()));
    registry.register(Arc::new(WhatsAppCloudHandler::new()));
    registry.register(Arc::new(TelegramHandler::new()));
    registry.register(Arc::new(RocketChatHandler::new()));
    registry
}

/// The running binary ships without a persistent backend implementation —
/// the store that reconciles channels, messages, and statuses against a
/// messaging engine is an external collaborator this core is built against,
/// not a component of it. `serve` runs against the in-memory test double so
/// the relay is exercisable standalone; a real deployment links its own
/// `Backend` impl in place of this one.
fn dev_backend() -> Arc<dyn Backend> {
    Arc::new(courier_core::backend::test_util::InMemoryBackend::new())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("courier.toml"));
    let mut config = Config::load(&config_path)?;

    match cli.command {
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            let config = Arc::new(config);
            let handlers = register_handlers();
            let worker_count = config.server.dispatch_workers;

            tracing::info!(bind = %config.bind_addr(), workers = worker_count, "starting courier");

            let state = Arc::new(ServerState::new(config, dev_backend(), handlers));
            let dispatch_handles =
                courier_server::dispatch::start_dispatch_workers(state.clone(), worker_count);

            courier_server::start_server(state).await?;

            for handle in dispatch_handles {
                handle.abort();
            }
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Channels => {
            let handlers = register_handlers();
            for (channel_type, name) in handlers.list() {
                println!("{channel_type}\t{name}");
            }
        }
    }

    Ok(())
}
