//! Version-aware patch lookup and publishing
//!
//! Clients report their installed build; this module answers with every
//! published patch newer than it, and lets a publisher register new patches.
//!
//! # Architecture
//!
//! ```text
//!                  ┌──────────────┐
//! client string ──▶│  Identifier  │
//!                  └──────┬───────┘
//!                         ▼
//! ┌─────────────┐  ┌──────────────┐  miss  ┌─────────────┐
//! │ LookupCache │◀─│LookupService │───────▶│ PatchCatalog│
//! └─────────────┘  └──────────────┘        └─────────────┘
//!        ▲                                        ▲
//!        │ invalidate_all  ┌──────────────┐ append │
//!        └─────────────────│PublishService│────────┘
//!                          └──────────────┘
//! ```
//!
//! # Modules
//!
//! - [`identifier`]: `EDOPRO-<PLATFORM>-x.y.z` parsing and ordering
//! - [`catalog`]: SQLite-backed append-only patch store
//! - [`cache`]: Lookup result memoization (in-memory or SQLite)
//! - [`lookup`]: Cache-then-catalog lookup orchestration
//! - [`publish`]: Credential check, validation, append, invalidation
//! - [`sqlite`]: Writer connection plus pooled read-only connections
//! - [`types`]: `PatchRecord`, the `PatchEntry` response shape and serialized `PatchList`
//! - [`error`]: Error types for every layer

pub mod cache;
pub mod catalog;
pub mod error;
pub mod identifier;
pub mod lookup;
pub mod publish;
pub mod sqlite;
pub mod types;
