pub mod api;
pub mod client;
pub mod config;
pub mod db;
pub mod engine;
pub mod mcp;
pub mod models;
