//! # Recall Harness
//!
//! A knowledge-base Q&A backend: wiki pages and chat conversations are
//! imported into SQLite, embedded, projected into a vector index, and
//! retrieved as context for assistant answers.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌─────────────────┐   ┌──────────┐   ┌────────────┐
//! │ PageSource │──▶│  SQLite store    │◀──│ Correlator│◀──│ Chat events │
//! │ (imports)  │   │ pages/interacts │   └────┬─────┘   │ (HTTP)      │
//! └────────────┘   └───────┬─────────┘        │         └────────────┘
//!                          │                  ▼
//!                   ┌──────▼───────┐    ┌──────────┐
//!                   │  Reconcile    │    │ Responder │
//!                   │ (embeddings) │    │ (answers) │
//!                   └──────┬───────┘    └────▲─────┘
//!                          ▼                 │
//!                   ┌──────────────┐   ┌─────┴─────┐
//!                   │ Vector index │──▶│ Retrieval  │
//!                   └──────────────┘   └───────────┘
//! ```
//!
//! Every record carries `updated_at` and `embedded_at` timestamps; a record
//! is stale when its embedding is missing or older than its content. The
//! reconciliation engine drives the stale set to empty, and content
//! mutations (re-imports, comment appends) re-mark records stale simply by
//! bumping `updated_at`.
//!
//! ## Quick Start
//!
//! ```bash
//! rcl init                              # create database
//! rcl import --file pages.json --space ENG
//! rcl reconcile --kind pages            # embed stale records
//! rcl sync-index --kind pages           # project into the vector index
//! rcl retrieve "how do we deploy?"      # nearest record ids
//! rcl serve                             # start the event API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`store`] | SQLite record store and repository seams |
//! | [`ingest`] | Page sources and import |
//! | [`embedding`] | Embedding provider abstraction and vector codec |
//! | [`reconcile`] | Staleness-driven embedding reconciliation |
//! | [`index`] | Vector index clients |
//! | [`sync`] | Store-to-index projection |
//! | [`retrieve`] | Semantic retrieval |
//! | [`correlator`] | Chat event correlation |
//! | [`responder`] | Question answering |
//! | [`server`] | HTTP front door |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod correlator;
pub mod db;
pub mod embedding;
pub mod error;
pub mod index;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod reconcile;
pub mod responder;
pub mod retrieve;
pub mod server;
pub mod store;
pub mod sync;
