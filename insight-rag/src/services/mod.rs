mod format;
mod indexing;
mod rag;
mod summary;
pub mod surrounding;
#[cfg(test)]
pub(crate) mod testing;

pub use format::{format_enhanced_rag_context, format_merged_rag_context};
pub use indexing::MessageIndexer;
pub use rag::RagService;
pub use summary::{build_transcript, SummaryManager, EMPTY_CONVERSATION_SUMMARY, FALLBACK_SUMMARY};
pub use surrounding::{get_merged_surrounding_messages, get_surrounding_messages};
