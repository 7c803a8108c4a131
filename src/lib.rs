pub mod config;
pub mod database;
pub mod dates;
pub mod llm_client;
pub mod model_selection;
pub mod orchestrator;
pub mod schedule;
pub mod server;
pub mod service;
pub mod tools;
