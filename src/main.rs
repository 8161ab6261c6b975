//! # askdocs CLI
//!
//! ```bash
//! askdocs --config ./config/askdocs.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `askdocs init` | Create the SQLite database and the `asks` table |
//! | `askdocs serve` | Start the HTTP server |
//! | `askdocs budget` | Print the context token budget |
//! | `askdocs filter-corpus` | Remove bits from a corpus file by URL |

use askdocs::{config, corpus_cmd, migrate, server};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// askdocs: answer questions about a documentation corpus.
///
/// All commands except `filter-corpus` read a TOML configuration file.
/// See `config/askdocs.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "askdocs",
    about = "Retrieval-augmented question answering over a documentation corpus",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/askdocs.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the `asks` table. Safe to run
    /// more than once.
    Init,

    /// Start the HTTP server.
    ///
    /// Requires `OPENAI_API_KEY`. Loads the corpus named in `[library]`,
    /// runs migrations, and listens on `[server].bind`.
    Serve {
        /// Listen on 0.0.0.0 at this port instead of `[server].bind`.
        #[arg(long)]
        port: Option<u16>,
    },

    /// Print the context token budget and the terms it is computed from.
    Budget,

    /// Write a copy of a corpus file without bits whose URL contains a
    /// substring.
    FilterCorpus {
        /// Corpus file to read.
        #[arg(long)]
        input: PathBuf,

        /// Where to write the filtered corpus.
        #[arg(long)]
        output: PathBuf,

        /// URL substring to exclude.
        #[arg(long, default_value = corpus_cmd::DEFAULT_EXCLUDE)]
        exclude: String,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::FilterCorpus {
            input,
            output,
            exclude,
        } => {
            corpus_cmd::run_filter(&input, &output, &exclude)?;
        }
        command => {
            let cfg = config::load_config(&cli.config)?;
            run(command, cfg).await?;
        }
    }

    Ok(())
}

async fn run(command: Commands, mut cfg: config::Config) -> anyhow::Result<()> {
    match command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve { port } => {
            if let Some(port) = port {
                cfg.server.bind = format!("0.0.0.0:{}", port);
            }
            server::run_server(&cfg).await?;
        }
        Commands::Budget => {
            let inputs = cfg.model.budget_inputs();
            let budget = cfg.context_budget()?;
            println!("model_max_tokens:       {}", inputs.model_max_tokens);
            println!("prompt_overhead_tokens: {}", inputs.prompt_overhead_tokens);
            println!(
                "query_reserve_tokens:   {} (max_query_length {})",
                inputs.query_reserve_tokens(),
                inputs.max_query_length
            );
            println!("answer_tokens:          {}", inputs.answer_tokens);
            println!("context_budget:         {}", budget.tokens());
        }
        Commands::FilterCorpus { .. } => {}
    }
    Ok(())
}
