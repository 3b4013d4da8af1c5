//! Career Nav: multi-agent career roadmap engine.

pub mod agents;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod routes;
