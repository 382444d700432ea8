//! Deterministic stand-ins for the external capabilities and a tiny corpus host.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use axum::{http::StatusCode, routing::get, Json, Router};
use faq_match::chat::{ChatModel, GenerateOptions};
use faq_match::config::Config;
use faq_match::embedding::Embedder;
use faq_match::engine::FaqEngine;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Maps a text to the vector of the first keyword it contains (case-insensitive).
/// Texts with no keyword embed to `[0, 0, 0, 1]`.
pub struct KeywordEmbedder {
    table: Vec<(&'static str, Vec<f32>)>,
    pub calls: AtomicUsize,
    pub texts_embedded: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn new(table: Vec<(&'static str, Vec<f32>)>) -> Arc<Self> {
        Arc::new(Self {
            table,
            calls: AtomicUsize::new(0),
            texts_embedded: AtomicUsize::new(0),
        })
    }

    /// "tool" and "data" are orthogonal; "cargo" sits between them.
    pub fn standard() -> Arc<Self> {
        Self::new(vec![
            ("tool", vec![1.0, 0.0, 0.0, 0.0]),
            ("ferramenta", vec![1.0, 0.0, 0.0, 0.0]),
            ("data", vec![0.0, 1.0, 0.0, 0.0]),
            ("dados", vec![0.0, 1.0, 0.0, 0.0]),
            ("cargo", vec![0.6, 0.8, 0.0, 0.0]),
        ])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        self.table
            .iter()
            .find(|(needle, _)| lower.contains(needle))
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| vec![0.0, 0.0, 0.0, 1.0])
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

/// An embedding provider that is always down.
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing"
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("embedding provider unavailable")
    }
}

/// Answers language detection with a fixed string and enhancement with
/// either a rewrite or an error.
pub struct ScriptedChat {
    language_reply: String,
    enhancement: Option<String>,
    pub calls: AtomicUsize,
}

impl ScriptedChat {
    pub fn new(language_reply: &str, enhancement: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            language_reply: language_reply.to_string(),
            enhancement: enhancement.map(str::to_string),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, system: &str, _user: &str, _opts: &GenerateOptions) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if system.contains("language detection") {
            return Ok(self.language_reply.clone());
        }
        match &self.enhancement {
            Some(text) => Ok(text.clone()),
            None => bail!("chat quota exceeded"),
        }
    }
}

pub const EN_CORPUS: &str = r#"{"faq": [
    {"question": "What is this tool?", "answer": "X is a tool."},
    {"question": "Where is the data stored?", "answer": "In the ./data directory."}
]}"#;

pub const PT_CORPUS: &str = r#"{"faq": [
    {"question": "O que é esta ferramenta?", "answer": "X é uma ferramenta."},
    {"question": "Onde ficam os dados?", "answer": "No diretório ./data."}
]}"#;

pub fn write_corpus(dir: &Path, language: &str, json: &str) {
    std::fs::write(faq_match::faq_source::local_path(dir, language), json).unwrap();
}

pub fn engine(
    config: &Config,
    embedder: Arc<KeywordEmbedder>,
    chat: Arc<ScriptedChat>,
) -> FaqEngine {
    FaqEngine::new(config, embedder, chat).unwrap()
}

pub fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub async fn wait_for_server(port: u16, path: &str) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}{}", port, path);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if client.get(&url).send().await.is_ok() {
            return;
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

/// Serve remote corpora in every accepted shape plus failure cases.
///
/// Returns the base URL, e.g. `http://127.0.0.1:PORT`.
pub async fn spawn_corpus_host() -> String {
    let entries = serde_json::json!([
        { "question": "What is this tool?", "answer": "A remote tool answer." },
        { "question": "Where is the data stored?", "answer": "Remotely." }
    ]);
    let faq = serde_json::json!({ "faq": entries.clone() });
    let faqs = serde_json::json!({ "faqs": entries.clone() });
    let list = entries;

    let app = Router::new()
        .route("/faq.json", get(move || async move { Json(faq) }))
        .route("/faqs.json", get(move || async move { Json(faqs) }))
        .route("/list.json", get(move || async move { Json(list) }))
        .route("/empty.json", get(|| async { Json(serde_json::json!([])) }))
        .route(
            "/wrong-shape.json",
            get(|| async { Json(serde_json::json!({ "items": [] })) }),
        )
        .route(
            "/broken.json",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        )
        .route("/health", get(|| async { "ok" }));

    let port = find_free_port();
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    wait_for_server(port, "/health").await;

    format!("http://127.0.0.1:{}", port)
}
