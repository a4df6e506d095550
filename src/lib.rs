//! # Fleetsync API Library
//!
//! ELD provider integration and synchronization engine: provider adapters,
//! connection lifecycle, entity reconciliation, sync orchestration, webhook
//! routing, and the scheduled sync pass.

pub mod config;
pub mod connection_manager;
pub mod crypto;
pub mod db;
pub mod entitlements;
pub mod error;
pub mod handlers;
pub mod models;
pub mod notify;
pub mod providers;
pub mod reconcile;
pub mod repositories;
pub mod scheduler;
pub mod server;
pub mod sync_engine;
pub mod telemetry;
pub mod types;
pub mod webhooks;
pub use migration;
