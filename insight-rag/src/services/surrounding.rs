use std::collections::HashSet;

use crate::db::{DatabaseBackend, MessageStore};
use crate::error::Result;
use crate::models::{ConversationKind, Message, MergedSurroundingMessages, SurroundingMessages};

/// Up to `window` messages on each side of `message` within its conversation,
/// oldest first. The message itself is never included.
pub async fn get_surrounding_messages(
    store: &dyn DatabaseBackend,
    message: &Message,
    window: u32,
) -> Result<SurroundingMessages> {
    if window == 0 {
        return Ok(SurroundingMessages::default());
    }

    let before = store.get_messages_before(message, window).await?;
    let after = store.get_messages_after(message, window).await?;

    Ok(SurroundingMessages { before, after })
}

/// One window spanning several matches of the same conversation.
///
/// `before` is anchored on the earliest match and `after` on the latest;
/// `between` holds every non-matched message in between. Matches from other
/// conversations are ignored.
pub async fn get_merged_surrounding_messages(
    store: &dyn DatabaseBackend,
    kind: ConversationKind,
    conversation_id: i64,
    matches: &[Message],
    window: u32,
) -> Result<MergedSurroundingMessages> {
    let mut seen = HashSet::new();
    let mut matched: Vec<Message> = matches
        .iter()
        .filter(|m| m.conversation_kind == kind && m.conversation_id == conversation_id)
        .filter(|m| seen.insert(m.id))
        .cloned()
        .collect();
    matched.sort_by_key(|m| (m.created_at, m.id));

    let (Some(earliest), Some(latest)) = (matched.first(), matched.last()) else {
        return Ok(MergedSurroundingMessages::default());
    };

    let (before, after) = if window == 0 {
        (Vec::new(), Vec::new())
    } else {
        (
            store.get_messages_before(earliest, window).await?,
            store.get_messages_after(latest, window).await?,
        )
    };

    let between = if matched.len() > 1 {
        store
            .get_messages_between(earliest, latest)
            .await?
            .into_iter()
            .filter(|m| !seen.contains(&m.id))
            .collect()
    } else {
        Vec::new()
    };

    Ok(MergedSurroundingMessages {
        before,
        matched,
        between,
        after,
    })
}
