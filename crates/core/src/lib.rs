//! # Nutri Core
//!
//! Core logic for the supplement and nutrition knowledge-base console.
//!
//! This crate contains the data model and every console operation:
//! - Data-access contract with REST, document-store and local key-value transports
//! - Reverse-link synchronisation between vitamins, foods and deficiency symptoms
//! - Lab-test text consolidation and the batch migration/restore around it
//! - Choice-option history, CSV/JSON import and export, global search
//! - Identity, user roles and the text-generation/upload integrations
//!
//! **No API concerns**: HTTP servers and command-line parsing belong in `api-rest` and `cli`.

pub mod auth;
pub mod catalog;
pub mod choices;
pub mod client;
pub mod config;
pub mod constants;
pub mod entities;
pub mod error;
pub mod integrations;
pub mod merge;
pub mod migration;
pub mod resolve;
pub mod retry;
pub mod search;
pub mod store;
pub mod sync;
pub mod tabular;
pub mod transfer;

pub use config::ConsoleConfig;
pub use error::{ConsoleError, ConsoleResult};
pub use nutri_types::{EntityId, NonEmptyText};
