//! ragchat CLI - retrieval-augmented chat in the terminal

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use ragchat_core::prelude::*;

#[derive(Parser)]
#[command(name = "ragchat")]
#[command(about = "Chat with Azure OpenAI grounded on an Azure AI Search index", long_about = None)]
#[command(version)]
struct Cli {
    /// Extra configuration file, merged over ragchat.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Refine a search query, retrieve and answer on every turn
    Chat {
        /// Number of turns before exiting
        #[arg(short, long)]
        turns: Option<usize>,
    },
    /// Resend the whole conversation with the index attached as a data source
    Direct {
        /// Number of turns before exiting
        #[arg(short, long)]
        turns: Option<usize>,
    },
    /// Print the effective configuration with secrets masked
    Config,
    /// Version information
    Version,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<RagConfig> {
    RagConfig::load(path.map(PathBuf::as_path)).context("Failed to load configuration")
}

#[tokio::main]
async fn main() -> Result<()> {
    // Variables from .env feed the legacy and RAGCHAT_ names alike
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Version => {
            println!("ragchat {}", env!("CARGO_PKG_VERSION"));
            println!("ragchat-core {}", ragchat_core::VERSION);
        }
        Commands::Config => {
            let config = load_config(cli.config.as_ref())?;
            println!("{}", serde_json::to_string_pretty(&config.redacted())?);
        }
        Commands::Chat { turns } => {
            let config = load_config(cli.config.as_ref())?;
            let provider = Arc::new(AzureOpenAIProvider::from_config(&config.openai, &config.http)?);
            let search = Arc::new(AzureSearchClient::from_config(&config.search, &config.http)?);

            let mut chat = ConversationLoop::from_config(
                &config,
                provider,
                search,
                Arc::new(HeuristicTokenCounter::new()),
            )?;
            if let Some(turns) = turns {
                chat = chat.with_max_turns(turns);
            }

            let transcript = chat
                .run(&mut StdConsole::stdio())
                .await
                .context("Conversation failed")?;
            tracing::info!(
                session_id = %transcript.session_id,
                turns = transcript.turns.len(),
                "Session closed"
            );
        }
        Commands::Direct { turns } => {
            let config = load_config(cli.config.as_ref())?;
            let provider = Arc::new(AzureOpenAIProvider::from_config(&config.openai, &config.http)?);

            let mut chat = DirectChat::from_config(&config, provider);
            if let Some(turns) = turns {
                chat = chat.with_max_turns(turns);
            }

            chat.run(&mut StdConsole::stdio())
                .await
                .context("Conversation failed")?;
        }
    }

    Ok(())
}
