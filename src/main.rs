//! # FAQ Match CLI (`faqbot`)
//!
//! ## Usage
//!
//! ```bash
//! faqbot --config ./config/faq.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `faqbot search "<question>"` | Match a question against the FAQ corpus |
//! | `faqbot cache list` | Show persisted embedding blobs |
//! | `faqbot cache clear` | Delete cached embeddings (all or one language) |
//! | `faqbot cache rebuild` | Regenerate local embeddings for every supported language |
//! | `faqbot serve` | Start the HTTP API |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use faq_match::cache::{CacheScope, EmbeddingCache};
use faq_match::config::{self, Config};
use faq_match::embedding::DisabledEmbedder;
use faq_match::engine::{FaqEngine, SearchRequest};
use faq_match::language::parse_language_code;
use faq_match::models::SearchOutcome;
use faq_match::server;

/// Semantic FAQ matching over multilingual corpora.
#[derive(Parser)]
#[command(name = "faqbot", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/faq.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Match a question against the FAQ corpus.
    Search {
        /// The user's question.
        question: String,

        /// Match against a remote JSON corpus instead of the local files.
        #[arg(long)]
        url: Option<String>,

        /// Rewrite the matched answer conversationally.
        #[arg(long)]
        enhance: bool,
    },

    /// Manage the embedding cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Start the HTTP API.
    ///
    /// Binds to the address configured in `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum CacheAction {
    /// List persisted embedding blobs.
    List,

    /// Delete cached embeddings so they are regenerated on the next search.
    Clear {
        /// Only clear blobs for this language (e.g. `pt`).
        #[arg(long)]
        language: Option<String>,
    },

    /// Regenerate local embeddings for every supported language.
    Rebuild,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Search {
            question,
            url,
            enhance,
        } => {
            let engine = FaqEngine::from_config(&cfg)?;
            let mut req = SearchRequest::new(question).enhanced(enhance);
            req.faq_url = url;

            match engine.search(&req).await? {
                SearchOutcome::Found(m) => {
                    println!("question: {}", m.question);
                    println!("score:    {:.4}", m.score);
                    println!();
                    println!("{}", m.answer);
                }
                SearchOutcome::NoMatch => {
                    println!("No relevant FAQ found.");
                }
            }
        }
        Commands::Cache { action } => run_cache(&cfg, action).await?,
        Commands::Serve => server::run_server(&cfg).await?,
    }

    Ok(())
}

async fn run_cache(cfg: &Config, action: CacheAction) -> anyhow::Result<()> {
    match action {
        CacheAction::List => {
            let blobs = offline_cache(cfg).list()?;
            if blobs.is_empty() {
                println!("No cached embeddings.");
            }
            for blob in blobs {
                println!("{:<20} {:>10} bytes", blob.key.as_str(), blob.size_bytes);
            }
        }
        CacheAction::Clear { language } => {
            let scope = match language {
                Some(raw) => CacheScope::Language(
                    parse_language_code(&raw)
                        .ok_or_else(|| anyhow::anyhow!("invalid language code: {}", raw))?,
                ),
                None => CacheScope::All,
            };
            let removed = offline_cache(cfg).invalidate(&scope)?;
            println!("cache clear");
            println!("  removed: {}", removed);
        }
        CacheAction::Rebuild => {
            let engine = FaqEngine::from_config(cfg)?;
            let languages = engine.supported_languages().to_vec();
            println!("cache rebuild");
            for report in engine.rebuild_embeddings(&languages).await {
                match report.error {
                    None => println!("  {}: {} entries", report.language, report.entries),
                    Some(e) => println!("  {}: failed ({})", report.language, e),
                }
            }
        }
    }

    Ok(())
}

/// A cache handle for commands that never embed, so they run without
/// provider credentials.
fn offline_cache(cfg: &Config) -> EmbeddingCache {
    EmbeddingCache::new(cfg.data.dir.clone(), Arc::new(DisabledEmbedder))
}
