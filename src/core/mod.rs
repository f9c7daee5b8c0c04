pub mod agent;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod llm;
pub mod manager;
pub mod store;
pub mod terminal;
