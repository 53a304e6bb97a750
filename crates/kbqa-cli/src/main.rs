//! kbqa CLI - Command-line interface
//!
//! Usage:
//!   kbqa ingest [--path <file-or-dir>]
//!   kbqa ask <question> [--top-k N] [--show-passages]
//!   kbqa search <query> [--top-k N]
//!   kbqa stats
//!   kbqa chat

mod session;

use anyhow::Context;
use clap::{Parser, Subcommand};
use kbqa_core::{AppConfig, IngestionReport, KbqaError, QueryResult};
use kbqa_rag::KnowledgeBase;
use session::{Command, Role, Session};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Characters of passage text shown in listings
const PREVIEW_CHARS: usize = 160;

#[derive(Parser)]
#[command(name = "kbqa")]
#[command(about = "Question answering over a local knowledge base")]
#[command(version)]
struct Cli {
    /// TOML configuration file (defaults to $KBQA_CONFIG, then built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest documents into the knowledge base
    Ingest {
        /// File or directory to add; rebuilds from the documents dir when omitted
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Ask a question
    Ask {
        question: String,
        /// Passages to retrieve
        #[arg(long)]
        top_k: Option<usize>,
        /// Print the passages the answer was grounded on
        #[arg(long)]
        show_passages: bool,
    },
    /// Similarity search without generation
    Search {
        query: String,
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Show index statistics
    Stats,
    /// Interactive question loop
    Chat,
}

impl Commands {
    /// A full rebuild replaces the index, so the startup build can be skipped
    fn rebuilds_everything(&self) -> bool {
        matches!(self, Commands::Ingest { path: None })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .or_else(|| std::env::var("KBQA_CONFIG").ok().map(PathBuf::from));
    let config = AppConfig::load(config_path).context("failed to load configuration")?;
    config.logging.init();
    config.validate().context("invalid configuration")?;

    let kb = if cli.command.rebuilds_everything() {
        KnowledgeBase::open_empty(config)
    } else {
        KnowledgeBase::open(config).await
    }
    .context("failed to open knowledge base")?;

    match cli.command {
        Commands::Ingest { path } => {
            let report = match path {
                Some(path) => kb.ingest_path(&path).await?,
                None => kb.rebuild().await?,
            };
            print_report(&report);
        }
        Commands::Ask {
            question,
            top_k,
            show_passages,
        } => {
            let answer = kb
                .composer()
                .answer(&question, top_k)
                .await
                .map_err(user_facing)?;
            println!("{}", answer.text);
            if show_passages {
                println!();
                print_passages(&answer.passages);
            }
        }
        Commands::Search { query, top_k } => {
            let k = top_k.unwrap_or(kb.config().rag.top_k);
            let max = kb.config().rag.max_top_k;
            if k == 0 || k > max {
                anyhow::bail!("--top-k must be between 1 and {max}");
            }
            let results = kb
                .retrieval()
                .search(&query, k)
                .await
                .map_err(user_facing)?;
            if results.is_empty() {
                println!("No matching passages.");
            } else {
                print_passages(&results);
            }
        }
        Commands::Stats => {
            let stats = kb.retrieval().stats().await;
            println!("Collection:      {}", stats.collection.name);
            println!(
                "Embedding model: {} ({} dims)",
                stats.collection.embedding_model, stats.collection.dimension
            );
            println!("Documents:       {}", stats.document_count);
            println!("Chunks:          {}", stats.chunk_count);
            if let Some(cache) = stats.cache {
                println!(
                    "Cache:           {} hits / {} misses ({:.1}% hit rate)",
                    cache.hits,
                    cache.misses,
                    cache.hit_rate * 100.0
                );
            }
        }
        Commands::Chat => run_chat(&kb).await?,
    }

    Ok(())
}

async fn run_chat(kb: &KnowledgeBase) -> anyhow::Result<()> {
    let mut session = Session::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    println!(
        "Ask about {}. Commands: /clear /stats /history /help /quit",
        kb.config().rag.assistant_scope
    );

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match Command::parse(line) {
            Some(Ok(Command::Quit)) => break,
            Some(Ok(Command::Clear)) => {
                session.clear();
                println!("Conversation cleared.");
            }
            Some(Ok(Command::Stats)) => {
                println!(
                    "Questions: {}  Responses: {}  Started: {}",
                    session.question_count(),
                    session.response_count(),
                    session.started_at().format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
            Some(Ok(Command::History)) => {
                for message in session.messages() {
                    let who = match message.role {
                        Role::User => "you",
                        Role::Assistant => "assistant",
                    };
                    println!(
                        "[{}] {}: {}",
                        message.timestamp.format("%H:%M:%S"),
                        who,
                        message.content
                    );
                }
            }
            Some(Ok(Command::Help)) => {
                println!("/clear    forget the conversation");
                println!("/history  show the conversation so far");
                println!("/stats    show question and response counts");
                println!("/quit     leave the chat");
            }
            Some(Err(message)) => println!("{message}"),
            None => {
                session.push_question(line);
                let response = kb.composer().answer_text(line).await;
                println!("{response}\n");
                session.push_response(response);
            }
        }
    }

    tracing::debug!(
        session = %session.id(),
        questions = session.question_count(),
        "Chat session ended"
    );
    Ok(())
}

/// Log the full error and keep only the message that is safe to show
fn user_facing(e: KbqaError) -> anyhow::Error {
    tracing::error!("Request failed: {}", e);
    anyhow::anyhow!(e.user_message())
}

fn print_report(report: &IngestionReport) {
    println!(
        "Ingested {} documents ({} chunks)",
        report.documents_ingested, report.chunks_indexed
    );
    if report.has_failures() {
        println!("Skipped {} documents:", report.failures.len());
        for failure in &report.failures {
            println!("  {}: {}", failure.source_path, failure.reason);
        }
    }
}

fn print_passages(results: &[QueryResult]) {
    for (rank, result) in results.iter().enumerate() {
        println!(
            "[{}] score {:.3}  chunk {} of {}",
            rank + 1,
            result.score,
            result.chunk.chunk_index,
            result.chunk.document_id
        );
        println!("    {}", preview(&result.chunk.text));
    }
}

fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PREVIEW_CHARS {
        flat
    } else {
        let cut: String = flat.chars().take(PREVIEW_CHARS).collect();
        format!("{cut}...")
    }
}
