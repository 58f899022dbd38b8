mod conversations;
mod messages;
mod summaries;

pub use conversations::ConversationRepository;
pub use messages::MessageRepository;
pub use summaries::SummaryRepository;
