pub mod conversation_service;
pub mod encryption;
pub mod identity;
pub mod message_service;
pub mod push;
pub mod receipt_service;
pub mod sweeper;
