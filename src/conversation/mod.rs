pub mod conversation_dto;
pub mod conversation_handlers;
pub mod conversation_models;
pub mod conversation_repository;

pub use conversation_models::{Conversation, Message, MessageResponse};
pub use conversation_repository::ConversationRepository;
