pub mod chat_repository;
pub mod message_service;
pub mod session_store;

pub use chat_repository::ChatRepository;
pub use message_service::MessageService;
pub use session_store::SessionStore;
