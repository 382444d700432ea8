//! The matching pipeline.
//!
//! ```text
//! Detecting ──▶ Loading ──▶ Embedding ──▶ Matching ──▶ (Enhancing) ──▶ Done
//!     │            │            │             │
//!     ▼            ▼            ▼             ▼
//!  Aborted      NoMatch      Aborted       NoMatch
//! ```
//!
//! | Stage | Failure | Outcome |
//! |-------|---------|---------|
//! | Detecting | chat capability error | `Err` (abort) |
//! | Loading | fetch/parse error, empty corpus | `Ok(NoMatch)` |
//! | Embedding | embedding capability error | `Err` (abort) |
//! | Matching | below threshold | `Ok(NoMatch)` |
//! | Enhancing | any | raw answer, `Ok(Found)` |
//!
//! Persisting a freshly built matrix is best effort; a failed write is logged
//! and does not abort the search.
//!
//! [`FaqEngine`] holds only configuration and shared clients, so one instance
//! can serve concurrent requests.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheKey, CacheScope, EmbeddingCache};
use crate::chat::{create_chat_model, ChatModel};
use crate::config::{Config, MatchingConfig, SourceConfig};
use crate::embedding::{create_embedder, Embedder};
use crate::enhance::AnswerEnhancer;
use crate::faq_source::{self, FaqSource};
use crate::language::LanguageDetector;
use crate::matcher;
use crate::models::{FaqDataset, SearchOutcome, SourceIdentity};

/// One search invocation.
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub question: String,
    /// Remote corpus to match against; overrides `source.remote_url`.
    pub faq_url: Option<String>,
    /// Rewrite the matched answer conversationally.
    pub enhance: bool,
}

impl SearchRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Default::default()
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.faq_url = Some(url.into());
        self
    }

    pub fn enhanced(mut self, enhance: bool) -> Self {
        self.enhance = enhance;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Detecting,
    Loading,
    Embedding,
    Matching,
    Enhancing,
}

/// Result of rebuilding one language's local embeddings.
#[derive(Debug, Clone, Serialize)]
pub struct RebuildReport {
    pub language: String,
    pub entries: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct FaqEngine {
    data_dir: PathBuf,
    matching: MatchingConfig,
    source: SourceConfig,
    embedder: Arc<dyn Embedder>,
    detector: LanguageDetector,
    enhancer: AnswerEnhancer,
    cache: EmbeddingCache,
    http: reqwest::Client,
}

impl FaqEngine {
    /// Build an engine with the providers named in `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let chat = create_chat_model(&config.chat)?;
        Self::new(config, embedder, chat)
    }

    /// Build an engine around explicitly supplied capabilities.
    pub fn new(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        chat: Arc<dyn ChatModel>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            data_dir: config.data.dir.clone(),
            matching: config.matching.clone(),
            source: config.source.clone(),
            detector: LanguageDetector::new(chat.clone(), &config.matching.default_language),
            enhancer: AnswerEnhancer::new(chat),
            cache: EmbeddingCache::new(config.data.dir.clone(), embedder.clone()),
            embedder,
            http,
        })
    }

    pub fn supported_languages(&self) -> &[String] {
        &self.matching.supported_languages
    }

    /// The corpus a request resolves to.
    pub fn source_for(&self, req: &SearchRequest) -> FaqSource {
        match req.faq_url.as_ref().or(self.source.remote_url.as_ref()) {
            Some(url) => FaqSource::Remote(url.clone()),
            None => FaqSource::Local,
        }
    }

    /// Answer `req.question` from the FAQ corpus.
    ///
    /// `Ok(NoMatch)` covers every soft outcome; `Err` means a capability call
    /// failed during detection or embedding.
    pub async fn search(&self, req: &SearchRequest) -> Result<SearchOutcome> {
        let question = req.question.trim();
        if question.is_empty() {
            anyhow::bail!("question must not be empty");
        }

        enter(Stage::Detecting);
        let language = self
            .detector
            .detect(question)
            .await
            .context("language detection failed")?;
        tracing::info!(language = %language, "detected language");

        enter(Stage::Loading);
        let source = self.source_for(req);
        let dataset = match self.load(&source, &language).await {
            Ok(dataset) => dataset,
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "FAQ source unavailable, treating as no match");
                return Ok(SearchOutcome::NoMatch);
            }
        };
        if dataset.is_empty() {
            tracing::info!(language = %language, "FAQ corpus is empty");
            return Ok(SearchOutcome::NoMatch);
        }

        enter(Stage::Embedding);
        let key = CacheKey::derive(&dataset.source, &language);
        let matrix = self
            .cache
            .get_or_build(&dataset.entries, &key)
            .await
            .context("corpus embedding failed")?;

        enter(Stage::Matching);
        let found = matcher::best_match(
            self.embedder.as_ref(),
            question,
            &dataset.entries,
            &matrix,
            self.matching.threshold,
        )
        .await
        .context("query embedding failed")?;

        let Some(mut result) = found else {
            return Ok(SearchOutcome::NoMatch);
        };

        if req.enhance {
            enter(Stage::Enhancing);
            result.answer = self.enhancer.enhance(question, &result.answer).await;
        }

        tracing::info!(score = result.score, question = %result.question, "matched FAQ");
        Ok(SearchOutcome::Found(result))
    }

    async fn load(&self, source: &FaqSource, language: &str) -> Result<FaqDataset> {
        match source {
            FaqSource::Local => self.load_local(language).await,
            FaqSource::Remote(url) => {
                let timeout = Duration::from_secs(self.source.fetch_timeout_secs);
                Ok(faq_source::fetch_remote(&self.http, url, timeout).await?)
            }
        }
    }

    async fn load_local(&self, language: &str) -> Result<FaqDataset> {
        let dir = self.data_dir.clone();
        let language = language.to_string();
        let dataset = tokio::task::spawn_blocking(move || faq_source::load_local(&dir, &language))
            .await??;
        Ok(dataset)
    }

    /// Delete persisted embeddings; the next search for an affected key rebuilds them.
    pub fn invalidate_cache(&self, scope: &CacheScope) -> Result<usize> {
        self.cache.invalidate(scope)
    }

    /// Drop and regenerate the local embeddings for each language.
    ///
    /// Failures are collected per language rather than aborting the batch.
    pub async fn rebuild_embeddings(&self, languages: &[String]) -> Vec<RebuildReport> {
        let mut reports = Vec::with_capacity(languages.len());
        for language in languages {
            let report = match self.rebuild_one(language).await {
                Ok(entries) => RebuildReport {
                    language: language.clone(),
                    entries,
                    error: None,
                },
                Err(e) => {
                    tracing::warn!(language = %language, error = %e, "could not rebuild embeddings");
                    RebuildReport {
                        language: language.clone(),
                        entries: 0,
                        error: Some(format!("{:#}", e)),
                    }
                }
            };
            reports.push(report);
        }
        reports
    }

    async fn rebuild_one(&self, language: &str) -> Result<usize> {
        let key = CacheKey::derive(
            &SourceIdentity::Local {
                language: language.to_string(),
            },
            language,
        );
        self.cache.remove(&key)?;

        let dataset = self.load_local(language).await?;
        self.cache.get_or_build(&dataset.entries, &key).await?;
        Ok(dataset.len())
    }
}

fn enter(stage: Stage) {
    tracing::debug!(stage = ?stage, "pipeline stage");
}
