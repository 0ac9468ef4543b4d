use std::sync::Arc;

use clap::{Parser, Subcommand};

use gemini_relay_core::config::Config;
use gemini_relay_engine::CommandResolver;
use gemini_relay_gateway::GatewayState;

mod logging;

#[derive(Parser)]
#[command(
    name = "gemini-relay",
    about = "Drive an interactive Gemini CLI session from the browser",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server
    Serve {
        /// Port to listen on (default: 5000)
        #[arg(long)]
        port: Option<u16>,

        /// Address to bind (default: 127.0.0.1)
        #[arg(long)]
        bind: Option<String>,

        /// Do not serve the browser UI
        #[arg(long)]
        no_ui: bool,
    },

    /// Find which engine command is available and print it
    Resolve,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Check the configuration for problems
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(std::path::PathBuf::from)
        .unwrap_or_else(Config::config_path);
    let config = Config::load(&config_path)?;

    logging::init(config.logging.as_ref(), cli.verbose);
    tracing::debug!(path = %config_path.display(), "Loaded config");

    match cli.command {
        Commands::Serve { port, bind, no_ui } => {
            let (warnings, errors) = config.validate();
            for warning in &warnings {
                tracing::warn!("{warning}");
            }
            if !errors.is_empty() {
                anyhow::bail!("invalid config: {}", errors.join("; "));
            }

            let port = port.unwrap_or_else(|| config.server_port());
            let bind = bind.unwrap_or_else(|| config.bind_addr());
            let ui = !no_ui && config.ui_enabled();

            tracing::info!("Starting Gemini Relay on {bind}:{port}");
            let state = Arc::new(GatewayState::new(config));
            gemini_relay_gateway::start_gateway(state, &bind, port, ui).await?;
        }
        Commands::Resolve => {
            let resolver = CommandResolver::from_config(&config.engine());
            let command = resolver.resolve().await?;
            println!("{command}");
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for warning in &warnings {
                    println!("warning: {warning}");
                }
                for error in &errors {
                    println!("error: {error}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("{} config error(s) in {}", errors.len(), config_path.display());
                }
                println!("Config OK: {}", config_path.display());
            }
        },
    }

    Ok(())
}
