//! AV10 de Julio Onboarding API Library
//!
//! Backend for the AV10 de Julio auto-parts marketplace: registration
//! wizard submission, staged admin review with a guarded state machine,
//! outbox-driven notifications and support tickets over Postgres.
//!
//! # Modules
//!
//! - `api`: API-layer namespace.
//! - `core`: Domain-layer namespace.
//! - `config`: Configuration management.
//! - `db`: Database connection, pool and schema bootstrap.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers.
//! - `models`: Document models and DTOs.
//! - `notifications`: Notification dispatch and read side.
//! - `outbox`: Transactional outbox and background dispatcher.
//! - `store`: Request/entity persistence operations.
//! - `tickets`: Support ticket storage.
//! - `wizard`: Schema-driven registration wizard engine.
//! - `workflow`: Pure onboarding state machine.

pub mod api;
pub mod core;

// Re-export primary modules for shared use in tests and other binaries
pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod notifications;
pub mod outbox;
pub mod store;
pub mod tickets;
pub mod wizard;
pub mod workflow;
