mod common;
mod context;
mod conversation;
mod message;

pub use common::*;
pub use context::*;
pub use conversation::*;
pub use message::*;
