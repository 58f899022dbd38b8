use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;

use crate::config::RagConfig;
use crate::db::{ConversationStore, DatabaseBackend, MessageStore};
use crate::embeddings::Embedder;
use crate::error::{RagError, Result};
use crate::llm::Summarizer;
use crate::models::{
    ConversationKind, EnhancedRagContext, MergedRagContext, Message, MessageSearchHit, RagQuery,
};

use super::format::{format_enhanced_rag_context, format_merged_rag_context};
use super::summary::SummaryManager;
use super::surrounding::{get_merged_surrounding_messages, get_surrounding_messages};

/// Retrieves context from a user's past conversations for a new message.
///
/// Every public method degrades to an empty result instead of failing; a
/// chat turn must never break because retrieval did.
#[derive(Clone)]
pub struct RagService {
    embedder: Option<Arc<dyn Embedder>>,
    summaries: SummaryManager,
    config: RagConfig,
}

/// Per-conversation data shared by every hit in that conversation.
#[derive(Debug, Clone)]
struct ConversationHeader {
    summary: String,
    date: DateTime<Utc>,
}

impl RagService {
    pub fn new(
        embedder: Option<Arc<dyn Embedder>>,
        summarizer: Option<Arc<dyn Summarizer>>,
        config: RagConfig,
    ) -> Self {
        Self {
            embedder,
            summaries: SummaryManager::new(summarizer, &config),
            config,
        }
    }

    /// A query for `owner_user_id` with the configured result limit.
    pub fn query(
        &self,
        owner_user_id: i64,
        query: impl Into<String>,
        kind: ConversationKind,
    ) -> RagQuery {
        RagQuery::new(owner_user_id, query, kind).with_limit(self.config.context_limit)
    }

    /// One context bundle per matched message, most relevant first.
    ///
    /// Hits from the same conversation share one summary lookup, so a
    /// conversation is summarized at most once per call.
    pub async fn get_enhanced_rag_context(
        &self,
        store: &dyn DatabaseBackend,
        query: &RagQuery,
    ) -> Vec<EnhancedRagContext> {
        let hits = self.find_matches(store, query).await;
        if hits.is_empty() {
            return Vec::new();
        }

        let headers = self
            .conversation_headers(store, query, &distinct_conversations(&hits))
            .await;

        let ready: Vec<(&Message, &ConversationHeader)> = hits
            .iter()
            .filter_map(|hit| {
                headers
                    .get(&hit.message.conversation_id)
                    .map(|header| (&hit.message, header))
            })
            .collect();

        let results = join_all(
            ready
                .iter()
                .map(|(message, header)| self.enrich_hit(store, message, header)),
        )
        .await;

        let mut contexts = Vec::with_capacity(results.len());
        for ((message, _), result) in ready.iter().zip(results) {
            match result {
                Ok(context) => contexts.push(context),
                Err(e) if e.is_upstream() => tracing::warn!(
                    message_id = message.id,
                    conversation_id = message.conversation_id,
                    error = %e,
                    "Skipping RAG hit"
                ),
                Err(e) => tracing::error!(
                    message_id = message.id,
                    conversation_id = message.conversation_id,
                    error = %e,
                    "Inconsistent RAG hit, skipping"
                ),
            }
        }

        tracing::debug!(
            owner_user_id = query.owner_user_id,
            hits = hits.len(),
            contexts = contexts.len(),
            "Assembled RAG context"
        );
        contexts
    }

    /// Like [`get_enhanced_rag_context`](Self::get_enhanced_rag_context) but
    /// with all matches of a conversation collapsed into one bundle. Bundles
    /// are ordered by their best match.
    pub async fn get_merged_rag_context(
        &self,
        store: &dyn DatabaseBackend,
        query: &RagQuery,
    ) -> Vec<MergedRagContext> {
        let hits = self.find_matches(store, query).await;
        if hits.is_empty() {
            return Vec::new();
        }

        let groups = group_by_conversation(hits);

        let results = join_all(groups.iter().map(|(conversation_id, matches)| {
            self.enrich_group(store, query, *conversation_id, matches)
        }))
        .await;

        let mut contexts = Vec::with_capacity(results.len());
        for ((conversation_id, _), result) in groups.iter().zip(results) {
            match result {
                Ok(context) => contexts.push(context),
                Err(e) => log_skipped_conversation(*conversation_id, &e),
            }
        }
        contexts
    }

    /// The formatted context block for a chat prompt, or `""` when there is
    /// nothing relevant.
    pub async fn build_context_block(&self, store: &dyn DatabaseBackend, query: &RagQuery) -> String {
        if self.config.merge_same_conversation {
            format_merged_rag_context(&self.get_merged_rag_context(store, query).await)
        } else {
            format_enhanced_rag_context(&self.get_enhanced_rag_context(store, query).await)
        }
    }

    async fn find_matches(
        &self,
        store: &dyn DatabaseBackend,
        query: &RagQuery,
    ) -> Vec<MessageSearchHit> {
        let Some(embedder) = &self.embedder else {
            tracing::debug!("Embeddings disabled, skipping RAG");
            return Vec::new();
        };

        if query.query.trim().is_empty() || query.limit == 0 {
            return Vec::new();
        }

        let embedding = match embedder.embed_query(&query.query).await {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::error!(
                    owner_user_id = query.owner_user_id,
                    error = %e,
                    "Failed to embed RAG query"
                );
                return Vec::new();
            }
        };

        let hits = match store
            .search_similar_messages(
                query.owner_user_id,
                query.conversation_kind,
                &embedding,
                query.current_conversation_id,
                query.limit,
            )
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                tracing::error!(
                    owner_user_id = query.owner_user_id,
                    error = %e,
                    "Vector search failed"
                );
                return Vec::new();
            }
        };

        hits.into_iter()
            .filter(|hit| {
                let owned = hit.message.owner_user_id == query.owner_user_id;
                if !owned {
                    tracing::error!(
                        owner_user_id = query.owner_user_id,
                        message_id = hit.message.id,
                        "Vector search returned another user's message"
                    );
                }
                owned
            })
            .collect()
    }

    /// Headers for every conversation that resolves; the rest are logged
    /// and left out.
    async fn conversation_headers(
        &self,
        store: &dyn DatabaseBackend,
        query: &RagQuery,
        conversation_ids: &[i64],
    ) -> HashMap<i64, ConversationHeader> {
        let results = join_all(
            conversation_ids
                .iter()
                .map(|&conversation_id| self.conversation_header(store, query, conversation_id)),
        )
        .await;

        conversation_ids
            .iter()
            .zip(results)
            .filter_map(|(&conversation_id, result)| match result {
                Ok(header) => Some((conversation_id, header)),
                Err(e) => {
                    log_skipped_conversation(conversation_id, &e);
                    None
                }
            })
            .collect()
    }

    async fn conversation_header(
        &self,
        store: &dyn DatabaseBackend,
        query: &RagQuery,
        conversation_id: i64,
    ) -> Result<ConversationHeader> {
        let kind = query.conversation_kind;

        let conversation = store
            .get_conversation(kind, conversation_id)
            .await?
            .ok_or_else(|| RagError::NotFound(format!("Conversation {kind}/{conversation_id}")))?;

        if conversation.owner_user_id != query.owner_user_id {
            return Err(RagError::Validation(format!(
                "Conversation {kind}/{conversation_id} is not owned by user {}",
                query.owner_user_id
            )));
        }

        let summary = self
            .summaries
            .get_or_create_conversation_summary(store, kind, conversation_id)
            .await;
        let date = store
            .get_first_message_at(kind, conversation_id)
            .await?
            .ok_or_else(|| {
                RagError::NotFound(format!("First message of conversation {kind}/{conversation_id}"))
            })?;

        Ok(ConversationHeader { summary, date })
    }

    async fn enrich_hit(
        &self,
        store: &dyn DatabaseBackend,
        message: &Message,
        header: &ConversationHeader,
    ) -> Result<EnhancedRagContext> {
        let surrounding =
            get_surrounding_messages(store, message, self.config.surrounding_messages).await?;

        Ok(EnhancedRagContext {
            conversation_id: message.conversation_id,
            conversation_kind: message.conversation_kind,
            summary: header.summary.clone(),
            matched_message: message.clone(),
            messages_before: surrounding.before,
            messages_after: surrounding.after,
            conversation_date: header.date,
        })
    }

    async fn enrich_group(
        &self,
        store: &dyn DatabaseBackend,
        query: &RagQuery,
        conversation_id: i64,
        matches: &[Message],
    ) -> Result<MergedRagContext> {
        let kind = query.conversation_kind;
        let header = self.conversation_header(store, query, conversation_id).await?;

        let window = get_merged_surrounding_messages(
            store,
            kind,
            conversation_id,
            matches,
            self.config.surrounding_messages,
        )
        .await?;

        Ok(MergedRagContext {
            conversation_id,
            conversation_kind: kind,
            summary: header.summary,
            matched_messages: window.matched,
            messages_before: window.before,
            messages_between: window.between,
            messages_after: window.after,
            conversation_date: header.date,
        })
    }
}

fn log_skipped_conversation(conversation_id: i64, error: &RagError) {
    if error.is_upstream() {
        tracing::warn!(conversation_id, error = %error, "Skipping RAG conversation");
    } else {
        tracing::error!(conversation_id, error = %error, "Inconsistent RAG conversation, skipping");
    }
}

/// Conversation ids of `hits`, deduplicated, in order of first appearance.
fn distinct_conversations(hits: &[MessageSearchHit]) -> Vec<i64> {
    let mut ids: Vec<i64> = Vec::new();
    for hit in hits {
        if !ids.contains(&hit.message.conversation_id) {
            ids.push(hit.message.conversation_id);
        }
    }
    ids
}

/// Groups hits by conversation in order of first appearance.
fn group_by_conversation(hits: Vec<MessageSearchHit>) -> Vec<(i64, Vec<Message>)> {
    let mut index: HashMap<i64, usize> = HashMap::new();
    let mut groups: Vec<(i64, Vec<Message>)> = Vec::new();

    for hit in hits {
        let conversation_id = hit.message.conversation_id;
        match index.get(&conversation_id) {
            Some(&i) => groups[i].1.push(hit.message),
            None => {
                index.insert(conversation_id, groups.len());
                groups.push((conversation_id, vec![hit.message]));
            }
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SummaryStore;
    use crate::models::{NewMessage, Role};
    use crate::services::testing::{
        at, seed_conversation, test_store, FailingEmbedder, FakeSummarizer, KeywordEmbedder,
    };
    use libsql::params;

    fn service(summarizer: Option<Arc<FakeSummarizer>>) -> RagService {
        let embedder: Arc<dyn Embedder> = Arc::new(KeywordEmbedder::default());
        let summarizer = summarizer.map(|s| s as Arc<dyn Summarizer>);
        RagService::new(Some(embedder), summarizer, RagConfig::default())
    }

    #[tokio::test]
    async fn test_results_follow_search_order_and_limit() {
        let (store, _file) = test_store().await;
        let kind = ConversationKind::Insight;
        seed_conversation(&store, kind, 1, 1, at(8, 0), &["How do I pray?", "Start simply."]).await;
        seed_conversation(&store, kind, 2, 1, at(9, 0), &["Prayer before meals?", "Yes, give thanks."])
            .await;
        seed_conversation(&store, kind, 3, 1, at(10, 0), &["What is faith?", "Hebrews 11."]).await;

        let rag = service(Some(Arc::new(FakeSummarizer::replying("Summary."))));
        let query = RagQuery::new(1, "prayer", kind).with_limit(2);

        let contexts = rag.get_enhanced_rag_context(&store, &query).await;

        assert_eq!(contexts.len(), 2);
        // Equal distance: newer message first.
        assert_eq!(contexts[0].conversation_id, 2);
        assert_eq!(contexts[1].conversation_id, 1);
        assert_eq!(contexts[0].summary, "Summary.");
        assert_eq!(contexts[0].conversation_date, at(9, 0));
    }

    #[tokio::test]
    async fn test_never_returns_other_users_or_current_conversation() {
        let (store, _file) = test_store().await;
        let kind = ConversationKind::Standalone;
        seed_conversation(&store, kind, 1, 1, at(8, 0), &["I pray daily"]).await;
        seed_conversation(&store, kind, 2, 2, at(8, 0), &["I pray too"]).await;
        seed_conversation(&store, kind, 3, 1, at(9, 0), &["pray for me"]).await;

        let rag = service(None);
        let query = RagQuery::new(1, "pray", kind).excluding(3);

        let contexts = rag.get_enhanced_rag_context(&store, &query).await;

        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].conversation_id, 1);
        assert!(contexts.iter().all(|c| c.matched_message.owner_user_id == 1));
        assert_eq!(contexts[0].summary, "Previous conversation");
    }

    #[tokio::test]
    async fn test_kinds_are_searched_separately() {
        let (store, _file) = test_store().await;
        seed_conversation(&store, ConversationKind::Insight, 1, 1, at(8, 0), &["pray"]).await;

        let rag = service(None);
        let query = RagQuery::new(1, "pray", ConversationKind::Standalone);

        assert!(rag.get_enhanced_rag_context(&store, &query).await.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_or_failing_embedder_yields_nothing() {
        let (store, _file) = test_store().await;
        seed_conversation(&store, ConversationKind::Insight, 1, 1, at(8, 0), &["pray"]).await;
        let query = RagQuery::new(1, "pray", ConversationKind::Insight);

        let disabled = RagService::new(None, None, RagConfig::default());
        assert!(disabled.get_enhanced_rag_context(&store, &query).await.is_empty());
        assert_eq!(disabled.build_context_block(&store, &query).await, "");

        let failing = RagService::new(Some(Arc::new(FailingEmbedder)), None, RagConfig::default());
        assert!(failing.get_enhanced_rag_context(&store, &query).await.is_empty());
    }

    #[tokio::test]
    async fn test_blank_query_and_zero_limit_skip_embedding() {
        let (store, _file) = test_store().await;
        let embedder = Arc::new(KeywordEmbedder::default());
        let rag = RagService::new(
            Some(embedder.clone() as Arc<dyn Embedder>),
            None,
            RagConfig::default(),
        );

        let blank = RagQuery::new(1, "   ", ConversationKind::Insight);
        let zero = RagQuery::new(1, "pray", ConversationKind::Insight).with_limit(0);

        assert!(rag.get_enhanced_rag_context(&store, &blank).await.is_empty());
        assert!(rag.get_enhanced_rag_context(&store, &zero).await.is_empty());
        assert_eq!(
            embedder.calls.load(std::sync::atomic::Ordering::SeqCst),
            0
        );
    }

    #[tokio::test]
    async fn test_orphaned_hit_is_dropped_without_affecting_siblings() {
        let (store, file) = test_store().await;
        let kind = ConversationKind::Insight;
        seed_conversation(&store, kind, 1, 1, at(8, 0), &["pray with me"]).await;

        // A message whose conversation row is missing.
        let conn = libsql::Builder::new_local(file.path())
            .build()
            .await
            .unwrap()
            .connect()
            .unwrap();
        conn.execute(
            "INSERT INTO messages (conversation_kind, conversation_id, owner_user_id, role, content, embedding, created_at)
             VALUES ('insight', 42, 1, 'user', 'pray again', vector32('[1,0,0]'), '2024-11-24T11:00:00.000000Z')",
            params![],
        )
        .await
        .unwrap();

        let rag = service(None);
        let contexts = rag
            .get_enhanced_rag_context(&store, &RagQuery::new(1, "pray", kind))
            .await;

        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].conversation_id, 1);
    }

    #[tokio::test]
    async fn test_summary_is_generated_once_and_reused() {
        let (store, _file) = test_store().await;
        let kind = ConversationKind::Insight;
        seed_conversation(&store, kind, 10, 1, at(8, 0), &["pray", "ok"]).await;
        let summarizer = Arc::new(FakeSummarizer::replying("About prayer."));
        let rag = service(Some(summarizer.clone()));
        let query = RagQuery::new(1, "pray", kind).with_limit(1);

        rag.get_enhanced_rag_context(&store, &query).await;
        rag.get_enhanced_rag_context(&store, &query).await;

        assert_eq!(summarizer.call_count(), 1);
        let cached = store.get_conversation_summary(kind, 10).await.unwrap().unwrap();
        assert_eq!(cached.message_count, 2);
    }

    #[tokio::test]
    async fn test_hits_in_one_conversation_share_a_single_summary() {
        let (store, _file) = test_store().await;
        let kind = ConversationKind::Insight;
        seed_conversation(
            &store,
            kind,
            10,
            1,
            at(8, 0),
            &["pray", "ok", "pray again", "sure", "pray more"],
        )
        .await;
        // Suspends inside the summarizer so concurrent lookups would overlap.
        let summarizer = Arc::new(FakeSummarizer::slow(
            "About prayer.",
            std::time::Duration::from_millis(50),
        ));
        let rag = service(Some(summarizer.clone()));

        let contexts = rag
            .get_enhanced_rag_context(&store, &RagQuery::new(1, "pray", kind).with_limit(3))
            .await;

        assert_eq!(contexts.len(), 3);
        assert!(contexts.iter().all(|c| c.summary == "About prayer."));
        assert_eq!(summarizer.call_count(), 1);
    }

    #[tokio::test]
    async fn test_merged_context_groups_by_conversation() {
        let (store, _file) = test_store().await;
        let kind = ConversationKind::Insight;
        seed_conversation(
            &store,
            kind,
            1,
            1,
            at(8, 0),
            &["Teach me to pray", "Start with Matthew 6", "Should I pray at night?", "Any time."],
        )
        .await;
        seed_conversation(&store, kind, 2, 1, at(7, 0), &["prayer list", "Good idea."]).await;

        let rag = service(None);
        let contexts = rag
            .get_merged_rag_context(&store, &RagQuery::new(1, "pray", kind).with_limit(3))
            .await;

        assert_eq!(contexts.len(), 2);
        // Conversation 1 holds the newest exact match, so it ranks first.
        assert_eq!(contexts[0].conversation_id, 1);
        assert_eq!(contexts[0].matched_messages.len(), 2);
        assert_eq!(contexts[0].messages_between.len(), 1);
        assert_eq!(contexts[0].messages_between[0].content, "Start with Matthew 6");
        assert_eq!(contexts[1].conversation_id, 2);
        assert_eq!(contexts[1].matched_messages.len(), 1);
    }

    #[tokio::test]
    async fn test_context_block_switches_on_merge_setting() {
        let (store, _file) = test_store().await;
        let kind = ConversationKind::Insight;
        seed_conversation(&store, kind, 1, 1, at(8, 0), &["pray", "ok", "pray more"]).await;
        let query = RagQuery::new(1, "pray", kind).with_limit(2);

        let embedder: Arc<dyn Embedder> = Arc::new(KeywordEmbedder::default());
        let merged = RagService::new(
            Some(embedder.clone()),
            None,
            RagConfig {
                merge_same_conversation: true,
                ..RagConfig::default()
            },
        );
        let per_hit = RagService::new(Some(embedder), None, RagConfig::default());

        let merged_block = merged.build_context_block(&store, &query).await;
        let per_hit_block = per_hit.build_context_block(&store, &query).await;

        assert_eq!(merged_block.matches("---excerpt---").count(), 1);
        assert!(merged_block.contains("← Match 1/2 via semantic search"));
        assert_eq!(per_hit_block.matches("---excerpt---").count(), 2);
    }

    #[tokio::test]
    async fn test_foreign_conversation_row_drops_hit() {
        let (store, _file) = test_store().await;
        let kind = ConversationKind::Insight;
        // Conversation row owned by user 2, message row claiming user 1.
        store.ensure_conversation(kind, 5, 2).await.unwrap();
        let message = store
            .append_message(&NewMessage::new(kind, 5, 1, Role::User, "pray"))
            .await
            .unwrap();
        store
            .update_message_embedding(message.id, &[1.0, 0.0, 0.0])
            .await
            .unwrap();

        let contexts = service(None)
            .get_enhanced_rag_context(&store, &RagQuery::new(1, "pray", kind))
            .await;
        assert!(contexts.is_empty());
    }

    #[test]
    fn test_distinct_conversations_keeps_first_appearance_order() {
        let hit = |conversation_id: i64| MessageSearchHit {
            message: Message {
                id: conversation_id,
                conversation_kind: ConversationKind::Insight,
                conversation_id,
                owner_user_id: 1,
                role: Role::User,
                content: String::new(),
                created_at: at(8, 0),
            },
            distance: 0.0,
        };

        assert_eq!(distinct_conversations(&[hit(7), hit(3), hit(7), hit(5)]), vec![7, 3, 5]);
    }

    #[test]
    fn test_group_by_conversation_keeps_first_appearance_order() {
        let hit = |id: i64, conversation_id: i64| MessageSearchHit {
            message: Message {
                id,
                conversation_kind: ConversationKind::Insight,
                conversation_id,
                owner_user_id: 1,
                role: Role::User,
                content: String::new(),
                created_at: at(8, 0),
            },
            distance: 0.0,
        };

        let groups = group_by_conversation(vec![hit(1, 7), hit(2, 3), hit(3, 7)]);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, 7);
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, 3);
    }
}
