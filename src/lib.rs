pub mod agent;
pub mod artifacts;
pub mod config;
pub mod errors;
pub mod events;
pub mod llm;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod sandbox;
pub mod selector;
pub mod server;
pub mod tiers;
pub mod validate;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;
