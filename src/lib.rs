// Public API for the relay binary, game clients and integration tests

pub mod client;
pub mod config;
pub mod coordinator;
pub mod llm;
pub mod oracle;
pub mod protocol;
pub mod relay;
pub mod session;
pub mod signaling;
pub mod stats;
pub mod teams;
pub mod types;
