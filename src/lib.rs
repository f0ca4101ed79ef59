//! Lead Distribution Library
//!
//! Decides which paying customers receive a newly captured lead: at most
//! `K` recipients per lead, never the same customer twice, never beyond a
//! batch's purchased capacity.
//!
//! # Modules
//!
//! - `geo`: coordinates and great-circle distance.
//! - `geocoder`: postcode -> coordinates (HTTP, cached, static).
//! - `regions`: Dutch province / postcode-area table.
//! - `models`: leads, batches, distributions, candidates.
//! - `leads`: intake validation and normalization.
//! - `eligibility`: per (lead, batch) evaluation.
//! - `ranking`: priority ordering and selection.
//! - `committer`: capacity-safe commit (live and dry run).
//! - `engine`: the end-to-end pipeline.
//! - `registry`: storage traits; `db_storage` and `memory_store` implement them.
//! - `notifications`: post-commit delivery triggers.
//! - `handlers`, `webhook_handler`, `webhook_models`: HTTP surface.
//! - `circuit_breaker`, `config`, `db`, `errors`: service plumbing.

pub mod circuit_breaker;
pub mod committer;
pub mod config;
pub mod db;
pub mod db_storage;
pub mod eligibility;
pub mod engine;
pub mod errors;
pub mod geo;
pub mod geocoder;
pub mod handlers;
pub mod leads;
pub mod memory_store;
pub mod models;
pub mod notifications;
pub mod ranking;
pub mod regions;
pub mod registry;
pub mod webhook_handler;
pub mod webhook_models;
