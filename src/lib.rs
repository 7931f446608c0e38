//! # tablechat
//!
//! A retrieval-augmented chat backend for tabular files.
//!
//! A client uploads a CSV or Excel spreadsheet; tablechat parses it into
//! row records, chunks and embeds them into a per-upload in-memory vector
//! index registered under a fresh room id, and answers subsequent
//! questions by retrieving the most similar chunks and prompting a
//! language model with a strictly grounded template.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────────┐   ┌─────────────┐
//! │  Upload  │──▶│     Pipeline       │──▶│   Session    │
//! │ CSV/XLSX │   │ Parse+Chunk+Embed │   │  Registry    │
//! └──────────┘   └───────────────────┘   └──────┬──────┘
//!                                               │
//!                  ┌────────────────────────────┤
//!                  ▼                            ▼
//!            ┌──────────┐                ┌──────────┐
//!            │ Retrieve │───────────────▶│   LLM    │
//!            │  top-k   │                │ (answer) │
//!            └──────────┘                └──────────┘
//! ```
//!
//! Sessions live only in process memory and die with the process; the
//! registry bounds them with LRU capacity eviction and an optional idle
//! TTL.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`ingest`] | Upload validation and row extraction |
//! | [`chunk`] | Deterministic record chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Per-session vector index |
//! | [`session`] | Session registry |
//! | [`answer`] | Grounded prompt and LLM call |
//! | [`server`] | HTTP facade |

pub mod answer;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod ingest;
pub mod models;
pub mod server;
pub mod session;
