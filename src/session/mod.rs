pub mod store;
pub mod types;

pub use store::{FileSessionStore, MemorySessionStore, SessionStore};
pub use types::{Message, MessageRole, ToolCallDescriptor};
