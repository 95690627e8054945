//! # ragchat
//!
//! Document ingestion and retrieval-augmented chat.
//!
//! Documents are extracted, chunked, embedded and stored as one vector index
//! archive per document. Chat turns condense follow-up questions, retrieve
//! passages from a document's index (or a managed search service), answer
//! through one of several LLM backends, and cite the documents they used.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────────────┐   ┌───────────┐
//! │  Blobs   │──▶│ Pipeline                 │──▶│ Index zip │
//! │ fs / S3  │   │ extract→chunk→embed→index│   │  (blob)   │
//! └──────────┘   └────────────┬─────────────┘   └─────┬─────┘
//!                             │ status                │
//!                             ▼                       ▼
//!                       ┌──────────┐          ┌──────────────┐
//!                       │  SQLite  │◀────────▶│ Chat engine  │──▶ LLM
//!                       │ docs+conv│  history │ per session  │
//!                       └──────────┘          └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ragchat init                                   # create database
//! ragchat ingest public/brochure.pdf             # build the index
//! ragchat chat "What is the warranty?" --document brochure.pdf
//! ragchat serve                                  # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | Document status and conversation stores |
//! | [`blob`] | Filesystem and S3 blob stores |
//! | [`aws_sig`] | SigV4 request signing and presigning |
//! | [`extract`] | PDF, DOCX and text extraction |
//! | [`embedding`] | HTTP embedding clients |
//! | [`llm`] | Bedrock runtime client |
//! | [`managed_search`] | Kendra retrieve client |
//! | [`ingest`] | Ingestion pipeline and stale-run watchdog |
//! | [`chat`] | Conversational retrieval engine |
//! | [`app`] | Wiring from config to components |
//! | [`server`] | HTTP API |

pub mod app;
pub mod aws_sig;
pub mod blob;
pub mod chat;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod ingest;
pub mod llm;
pub mod managed_search;
pub mod migrate;
pub mod server;
pub mod sqlite_store;
