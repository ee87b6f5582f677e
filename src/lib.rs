pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod models;
pub mod plan;
pub mod store;
pub mod validation;
