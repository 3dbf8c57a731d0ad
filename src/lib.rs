// Shared infrastructure
pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;

// Domain layer (business logic)
pub mod delivery;
pub mod events;
pub mod matching;
pub mod push;
pub mod registry;

// Application layer
pub mod api;
pub mod server;
pub mod triggers;
pub mod websocket;

// Supporting modules
pub mod tasks;
