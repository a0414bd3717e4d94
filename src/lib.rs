pub mod audit;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod geo;
pub mod idempotency;
pub mod models;
pub mod notify;
pub mod observability;
pub mod service;
pub mod state;
pub mod wallet;
