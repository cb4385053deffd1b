mod chat_service;
mod chat_session;

pub use chat_service::{ChatService, ChatServiceDependencies, ChatSettings, SendMessageRequest};
pub use chat_session::{ChatSession, IdentityOutcome, Snapshot};
