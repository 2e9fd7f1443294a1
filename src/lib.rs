// Infrastructure
pub mod broker;
pub mod config;
pub mod error;
pub mod metrics;

// Domain
pub mod actions;
pub mod events;
pub mod mail;
pub mod pipeline;
pub mod subscription;
pub mod template;

// Application layer
pub mod api;
pub mod server;

// Supporting modules
pub mod telemetry;
