use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use medrag_agent::RagGraph;
use medrag_core::config::{AppConfig, EmbeddingConfig};
use medrag_core::traits::TextGenerator;
use medrag_core::types::ConversationId;
use medrag_index::{HttpEmbeddingProvider, SqliteVectorIndex};
use medrag_memory::SqliteCheckpointStore;

#[derive(Parser)]
#[command(name = "medrag", version, about = "Conversational retrieval agent over medical records")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "medrag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve,
    /// Ask a single question and print the answer
    Ask {
        /// Conversation to continue (a new one is started if omitted)
        #[arg(short = 'c', long)]
        conversation: Option<String>,
        /// The question; read from stdin when empty
        #[arg(trailing_var_arg = true)]
        text: Vec<String>,
    },
    /// Print the stored turns of a conversation
    History {
        /// Conversation id
        id: String,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("medrag=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "medrag", &mut io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config)?;

    if let Commands::Config = cli.command {
        println!("{}", toml::to_string_pretty(&redacted(&config))?);
        return Ok(());
    }

    let graph = Arc::new(build_graph(&config)?);

    match cli.command {
        Commands::Serve => {
            let gateway_config = config.gateway.clone().unwrap_or_default();
            info!(bind = %gateway_config.bind, "Starting HTTP gateway");
            let server = medrag_gateway::GatewayServer::new(gateway_config, graph);
            let cancel = tokio_util::sync::CancellationToken::new();
            let cancel_clone = cancel.clone();

            // Graceful shutdown on Ctrl-C
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutting down gateway...");
                cancel_clone.cancel();
            });

            server.run(cancel).await?;
        }
        Commands::Ask { conversation, text } => {
            let text = if text.is_empty() {
                io::stdin()
                    .lock()
                    .lines()
                    .map_while(|l| l.ok())
                    .collect::<Vec<_>>()
                    .join("\n")
            } else {
                text.join(" ")
            };
            let id = conversation
                .map(|c| ConversationId::from_string(&c))
                .unwrap_or_else(ConversationId::new);

            let outcome = graph.invoke(&id, &text).await?;
            println!("{}", outcome.answer);
            eprintln!(
                "[conversation {} · {}]",
                outcome.conversation_id,
                outcome.route.as_str()
            );
        }
        Commands::History { id } => {
            let turns = graph.history(&ConversationId::from_string(&id)).await?;
            if turns.is_empty() {
                eprintln!("No history for conversation {}", id);
            }
            for (i, turn) in turns.iter().enumerate() {
                println!("[{}] Q: {}", i + 1, turn.query);
                println!("    A: {}", turn.answer);
            }
        }
        Commands::Config | Commands::Completions { .. } => {}
    }

    Ok(())
}

/// Explicit path, then `~/.medrag/config.toml`, then environment variables.
fn load_config(path: &PathBuf) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }

    let home_config = dirs_home().map(|h| h.join(".medrag").join("config.toml"));
    if let Some(ref path) = home_config {
        if path.exists() {
            info!(path = %path.display(), "Loading config from home directory");
            return Ok(AppConfig::load(path)?);
        }
    }

    eprintln!("Warning: No config file found. Set OPENAI_API_KEY or create medrag.toml");
    create_env_config()
}

fn create_env_config() -> anyhow::Result<AppConfig> {
    let model_id = std::env::var("MEDRAG_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
    let config = AppConfig::for_model(model_id, std::env::var("OPENAI_API_KEY").ok());
    config.validate()?;
    Ok(config)
}

/// Wire the capability clients and stores into a graph.
fn build_graph(config: &AppConfig) -> anyhow::Result<RagGraph> {
    std::fs::create_dir_all(config.workspace_dir()).ok();

    let llm: Arc<dyn TextGenerator> = Arc::from(medrag_llm::create_client(&config.model));

    let embedding = config.embedding.clone().unwrap_or_else(|| EmbeddingConfig {
        api_key: config.model.api_key.clone(),
        ..EmbeddingConfig::default()
    });
    let embedder = Arc::new(HttpEmbeddingProvider::from_config(&embedding));
    let index = Arc::new(SqliteVectorIndex::open(&config.index_path(), embedder)?);
    let checkpoints = Arc::new(SqliteCheckpointStore::open(&config.checkpoint_path())?);

    info!(
        model = %config.model.model_id,
        index = %config.index_path().display(),
        documents = index.len()?,
        "Graph ready"
    );

    Ok(RagGraph::new(llm, index, checkpoints, config.clone()))
}

/// Copy of the config with credentials masked, for display.
fn redacted(config: &AppConfig) -> AppConfig {
    let mask = |key: &Option<String>| key.as_ref().map(|_| "***".to_string());
    let mut shown = config.clone();
    shown.model.api_key = mask(&shown.model.api_key);
    if let Some(ref mut embedding) = shown.embedding {
        embedding.api_key = mask(&embedding.api_key);
    }
    if let Some(ref mut gateway) = shown.gateway {
        gateway.token = mask(&gateway.token);
    }
    shown
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
