use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use insight_rag::config::Config;
use insight_rag::db::{ConversationStore, Database, DatabaseBackend, LibSqlBackend, SummaryStore};
use insight_rag::embeddings::{Embedder, EmbeddingProvider};
use insight_rag::llm::{LlmProvider, Summarizer};
use insight_rag::models::{ConversationKind, NewMessage, Role};
use insight_rag::services::{MessageIndexer, RagService};

#[derive(Parser)]
#[command(name = "insight-rag")]
#[command(about = "Retrieve context from past Bible-reader conversations")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the context block a chat prompt would receive for a query
    Context {
        #[arg(long)]
        owner: i64,
        #[arg(long)]
        query: String,
        /// insight or standalone
        #[arg(long, default_value = "insight")]
        kind: ConversationKind,
        /// Current conversation, excluded from results
        #[arg(long)]
        exclude: Option<i64>,
        #[arg(long)]
        limit: Option<u32>,
        /// Collapse matches from one conversation into a single excerpt
        #[arg(long)]
        merge: bool,
    },
    /// Store a message and index its embedding
    Record {
        #[arg(long)]
        owner: i64,
        #[arg(long, default_value = "insight")]
        kind: ConversationKind,
        #[arg(long)]
        conversation: i64,
        #[arg(long, default_value = "user")]
        role: Role,
        #[arg(long)]
        content: String,
    },
    /// Embed stored messages that have no embedding yet
    Backfill {
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Delete a conversation with its messages and cached summary
    DeleteConversation {
        #[arg(long)]
        owner: i64,
        #[arg(long, default_value = "insight")]
        kind: ConversationKind,
        #[arg(long)]
        conversation: i64,
    },
    /// Drop every cached conversation summary
    ClearSummaries,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "insight_rag=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = Config::from_env();

    tracing::info!("Initializing database...");
    let raw_db = Database::new(&config.database).await?;
    let db: Arc<dyn DatabaseBackend> = Arc::new(LibSqlBackend::new(raw_db));

    let embedder: Option<Arc<dyn Embedder>> = match &config.embeddings {
        Some(embeddings) => {
            tracing::info!("Loading embedding model: {}...", embeddings.model);
            Some(Arc::new(EmbeddingProvider::new(embeddings)?))
        }
        None => {
            tracing::warn!("EMBEDDING_MODEL is disabled - retrieval will return no context");
            None
        }
    };

    match args.command {
        Command::Context {
            owner,
            query,
            kind,
            exclude,
            limit,
            merge,
        } => {
            if let Some(llm_config) = &config.llm {
                tracing::info!("Initializing LLM provider: {}...", llm_config.model);
            }
            let llm = LlmProvider::new(config.llm.as_ref());
            let summarizer: Option<Arc<dyn Summarizer>> = match llm.unavailable_reason().map(str::to_string) {
                None => Some(Arc::new(llm)),
                Some(reason) => {
                    tracing::warn!(%reason, "LLM unavailable - summaries will use a fallback text");
                    None
                }
            };

            config.rag.merge_same_conversation |= merge;
            let rag = RagService::new(embedder, summarizer, config.rag.clone());

            let mut rag_query = rag.query(owner, query, kind);
            if let Some(conversation_id) = exclude {
                rag_query = rag_query.excluding(conversation_id);
            }
            if let Some(limit) = limit {
                rag_query = rag_query.with_limit(limit);
            }

            let block = rag.build_context_block(&*db, &rag_query).await;
            if block.is_empty() {
                tracing::info!(owner_user_id = owner, "No relevant past conversations");
            } else {
                println!("{block}");
            }
        }
        Command::Record {
            owner,
            kind,
            conversation,
            role,
            content,
        } => {
            let indexer = MessageIndexer::new(embedder);
            let message = indexer
                .record_message(&*db, &NewMessage::new(kind, conversation, owner, role, content))
                .await?;
            println!("{}", serde_json::to_string_pretty(&message)?);
        }
        Command::Backfill { batch_size } => {
            let indexer = MessageIndexer::new(embedder);
            let batch_size = batch_size.unwrap_or(config.rag.backfill_batch_size);
            let report = indexer.backfill_embeddings(&*db, batch_size).await?;
            println!("{}", serde_json::to_string(&report)?);
        }
        Command::DeleteConversation {
            owner,
            kind,
            conversation,
        } => {
            let deleted = db.delete_conversation(kind, conversation, owner).await?;
            if deleted {
                tracing::info!(conversation_id = conversation, "Conversation deleted");
            } else {
                tracing::warn!(
                    conversation_id = conversation,
                    owner_user_id = owner,
                    "Nothing deleted: conversation missing or owned by another user"
                );
            }
        }
        Command::ClearSummaries => {
            let removed = db.clear_conversation_summaries().await?;
            tracing::info!(removed, "Cleared conversation summaries");
        }
    }

    db.sync().await?;

    Ok(())
}
