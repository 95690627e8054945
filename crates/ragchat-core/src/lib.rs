//! # ragchat core
//!
//! I/O-free logic shared by the ingestion pipeline and the chat engine:
//! data models, chunking, the vector index and its archive format, LLM
//! provider adapters, source attribution, conversation history policy, and
//! the traits through which external collaborators are injected.
//!
//! This crate has no tokio, sqlx, HTTP or filesystem dependencies.

pub mod attribution;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod history;
pub mod models;
pub mod provider;
pub mod services;
pub mod store;
pub mod vector_index;
