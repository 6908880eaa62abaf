pub mod chat;
pub mod keys;
pub mod status;
