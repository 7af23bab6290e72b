pub mod config;
mod config_env;
pub mod context;
pub mod coordinator;
pub mod credentials;
pub mod data_source;
pub mod errors;
pub mod interactions;
pub mod llm;
pub mod quickbooks;
pub mod records;
pub mod stream;
pub mod tools;
