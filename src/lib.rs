//! # FAQ Match
//!
//! Answers free-text questions from a curated FAQ corpus using semantic
//! similarity instead of exact text matching.
//!
//! ## Architecture
//!
//! ```text
//! question ─▶ language ─▶ faq_source ─▶ cache ─▶ matcher ─▶ enhance ─▶ answer
//!             (chat)      local/remote  (embed)  (embed)    (chat, optional)
//! ```
//!
//! The embedding and chat providers are injected as trait objects
//! ([`embedding::Embedder`], [`chat::ChatModel`]), so every stage can run
//! against a deterministic fake in tests.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`embedding`] | Embedding capability and vector math |
//! | [`chat`] | Chat-completion capability |
//! | [`language`] | Language detection |
//! | [`faq_source`] | Local and remote corpus loading |
//! | [`cache`] | On-disk embedding cache |
//! | [`matcher`] | Similarity ranking and threshold |
//! | [`enhance`] | Answer rewriting |
//! | [`engine`] | Matching pipeline |
//! | [`server`] | HTTP API |

pub mod cache;
pub mod chat;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod enhance;
pub mod faq_source;
pub mod language;
pub mod matcher;
pub mod models;
mod openai;
pub mod server;
