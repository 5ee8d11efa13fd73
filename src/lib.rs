//! # transcript-sync
//!
//! Bulk ingestion and incremental synchronization of video sources
//! (channels, playlists) into a transcript store.
//!
//! A source request becomes a pollable background job. The job lists the
//! source, drops everything already ingested or deliberately skipped, and
//! runs each remaining item through the pipeline (metadata, transcript,
//! summary, persist) one at a time. A periodic sweep re-checks known
//! sources and picks up newly published items.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────────┐
//! │ HTTP / CLI   │──▶│ Orchestrator │──▶│ Item Pipeline │
//! │ (axum, tsync)│   │  + Job Reg.  │   │ meta→tx→sum   │
//! └──────┬───────┘   └──────┬───────┘   └───────┬───────┘
//!        │                  │ dedup             │
//!        ▼                  ▼                   ▼
//! ┌──────────────┐   ┌──────────────────────────────────┐
//! │ Sweep + Sync │──▶│ SQLite: items, skips, sources    │
//! │   Checker    │   └──────────────────────────────────┘
//! └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! tsync init
//! tsync ingest-source https://www.youtube.com/@somechannel --max-items 20
//! tsync check @somechannel
//! tsync serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`store`] | Item store, skip ledger, source registry |
//! | [`traits`] | External collaborator traits |
//! | [`ytdlp`] | `yt-dlp` listing and metadata |
//! | [`transcript`] | Command-backed transcript retrieval |
//! | [`summarize`] | Summarization provider |
//! | [`pipeline`] | Per-item pipeline |
//! | [`dedup`] | Candidate filtering |
//! | [`jobs`] | Job registry |
//! | [`sources`] | Source identity resolution |
//! | [`orchestrator`] | Batch jobs |
//! | [`sync_check`] | "Has new items" heuristic |
//! | [`sweep`] | Scheduled sweep |
//! | [`engine`] | Component wiring |
//! | [`server`] | HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod db;
pub mod dedup;
pub mod engine;
pub mod events;
pub mod jobs;
pub mod migrate;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod server;
pub mod sources;
pub mod stats;
pub mod store;
pub mod summarize;
pub mod sweep;
pub mod sync_check;
pub mod traits;
pub mod transcript;
pub mod ytdlp;
