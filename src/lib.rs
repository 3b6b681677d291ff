pub mod chat;
pub mod config;
pub mod embedding;
pub mod errors;
pub mod history;
pub mod llm;
pub mod logging;
pub mod rag;
pub mod rewrite;
pub mod server;
pub mod state;
