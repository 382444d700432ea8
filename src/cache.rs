//! On-disk embedding cache.
//!
//! One blob per [`CacheKey`], stored as `<data_dir>/faq_embeddings_<key>.bin`.
//! This module is the only writer of those files.
//!
//! # Blob layout
//!
//! ```text
//! ┌───────┬─────────┬──────┬──────┬──────────────────────────┐
//! │ FAQE  │ version │ rows │ dims │ rows × dims f32 (LE)     │
//! │ 4 B   │ u32 LE  │ u32  │ u32  │                          │
//! └───────┴─────────┴──────┴──────┴──────────────────────────┘
//! ```
//!
//! Writes go to a temporary file in the same directory and are renamed into
//! place, so a concurrent reader sees either the old blob or the new one.
//! Two cold-cache requests for the same key may both build; the last rename
//! wins and both wrote identical content. A failed write is logged and the
//! freshly built matrix is still returned. Disk I/O runs on the blocking pool.
//!
//! A blob whose row count differs from the current corpus size is treated as
//! stale and rebuilt. Content changes that keep the row count (e.g. a remote
//! corpus edited in place) are not detected; use [`EmbeddingCache::invalidate`].

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::embedding::{blob_to_vec, vec_to_blob, Embedder};
use crate::models::{FaqEntry, SourceIdentity};

const MAGIC: &[u8; 4] = b"FAQE";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 16;
const BLOB_PREFIX: &str = "faq_embeddings_";
const BLOB_SUFFIX: &str = ".bin";
/// Hex characters of the URL digest kept in remote cache keys.
const URL_DIGEST_LEN: usize = 12;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("not an embedding blob (bad magic)")]
    BadMagic,
    #[error("unsupported blob format version {0}")]
    UnsupportedVersion(u32),
    #[error("blob truncated: expected {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },
    #[error("header declares {rows} rows of zero dimensions")]
    ZeroDims { rows: usize },
    #[error("row {row} has {found} dimensions, expected {expected}")]
    RaggedRows {
        row: usize,
        expected: usize,
        found: usize,
    },
}

/// Deterministic name of a persisted embedding matrix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a corpus identity and language.
    ///
    /// Local corpora key on the language alone; remote corpora key on a short
    /// SHA-256 digest of the URL followed by `_<language>`.
    pub fn derive(source: &SourceIdentity, language: &str) -> Self {
        match source {
            SourceIdentity::Local { .. } => CacheKey(language.to_string()),
            SourceIdentity::Remote { url } => {
                let digest = hex::encode(Sha256::digest(url.as_bytes()));
                CacheKey(format!("{}_{}", &digest[..URL_DIGEST_LEN], language))
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The language partition this key belongs to.
    pub fn language(&self) -> &str {
        self.0.rsplit('_').next().unwrap_or(&self.0)
    }

    fn file_name(&self) -> String {
        format!("{}{}{}", BLOB_PREFIX, self.0, BLOB_SUFFIX)
    }

    fn from_file_name(name: &str) -> Option<Self> {
        name.strip_prefix(BLOB_PREFIX)
            .and_then(|rest| rest.strip_suffix(BLOB_SUFFIX))
            .filter(|key| !key.is_empty())
            .map(|key| CacheKey(key.to_string()))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// N×D embedding matrix; row `i` belongs to entry `i` of its corpus.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EmbeddingMatrix {
    rows: Vec<Vec<f32>>,
}

impl EmbeddingMatrix {
    /// Build a matrix, rejecting rows of unequal length.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self, CacheError> {
        if let Some(first) = rows.first() {
            let expected = first.len();
            for (row, v) in rows.iter().enumerate() {
                if v.len() != expected {
                    return Err(CacheError::RaggedRows {
                        row,
                        expected,
                        found: v.len(),
                    });
                }
            }
        }
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[Vec<f32>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.rows.first().map(Vec::len).unwrap_or(0)
    }

    pub fn encode(&self) -> Vec<u8> {
        let dims = self.dims();
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.len() * dims * 4);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&(dims as u32).to_le_bytes());
        for row in &self.rows {
            bytes.extend_from_slice(&vec_to_blob(row));
        }
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CacheError> {
        if bytes.len() < HEADER_LEN {
            return Err(CacheError::Truncated {
                expected: HEADER_LEN,
                found: bytes.len(),
            });
        }
        if &bytes[0..4] != MAGIC {
            return Err(CacheError::BadMagic);
        }

        let read_u32 = |at: usize| {
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        let version = read_u32(4);
        if version != FORMAT_VERSION {
            return Err(CacheError::UnsupportedVersion(version));
        }
        let rows = read_u32(8) as usize;
        let dims = read_u32(12) as usize;

        if dims == 0 {
            if rows > 0 {
                return Err(CacheError::ZeroDims { rows });
            }
            if bytes.len() != HEADER_LEN {
                return Err(CacheError::Truncated {
                    expected: HEADER_LEN,
                    found: bytes.len(),
                });
            }
            return Ok(Self::default());
        }

        // Header values come from disk; an overflowing size cannot match any file.
        let expected = rows
            .checked_mul(dims)
            .and_then(|n| n.checked_mul(4))
            .and_then(|n| n.checked_add(HEADER_LEN))
            .ok_or(CacheError::Truncated {
                expected: usize::MAX,
                found: bytes.len(),
            })?;
        if bytes.len() != expected {
            return Err(CacheError::Truncated {
                expected,
                found: bytes.len(),
            });
        }

        let values = blob_to_vec(&bytes[HEADER_LEN..]);
        let rows = values.chunks_exact(dims).map(<[f32]>::to_vec).collect();

        Ok(Self { rows })
    }
}

/// Which blobs an invalidation removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheScope {
    /// Every blob in the language partition, local and remote.
    Language(String),
    All,
}

/// A persisted blob as seen on disk.
#[derive(Debug, Clone)]
pub struct CachedBlob {
    pub key: CacheKey,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Loads, builds, and persists embedding matrices.
#[derive(Clone)]
pub struct EmbeddingCache {
    dir: PathBuf,
    embedder: Arc<dyn Embedder>,
}

impl EmbeddingCache {
    pub fn new(dir: impl Into<PathBuf>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            dir: dir.into(),
            embedder,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn blob_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name())
    }

    /// Read the blob for `key`, if one exists.
    pub fn load(&self, key: &CacheKey) -> Result<Option<EmbeddingMatrix>> {
        let path = self.blob_path(key);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        let matrix = EmbeddingMatrix::decode(&bytes)
            .with_context(|| format!("Corrupt embedding blob {}", path.display()))?;
        Ok(Some(matrix))
    }

    /// Return the cached matrix for `key`, generating it from `entries` on a miss.
    ///
    /// On a miss all questions are embedded in one batch. An empty corpus
    /// yields an empty matrix without calling the embedder or touching disk.
    pub async fn get_or_build(
        &self,
        entries: &[FaqEntry],
        key: &CacheKey,
    ) -> Result<EmbeddingMatrix> {
        if entries.is_empty() {
            return Ok(EmbeddingMatrix::default());
        }

        match self.load_blocking(key).await {
            Ok(Some(matrix)) if matrix.len() == entries.len() => {
                tracing::debug!(key = %key, rows = matrix.len(), "embedding cache hit");
                return Ok(matrix);
            }
            Ok(Some(matrix)) => {
                tracing::warn!(
                    key = %key,
                    cached_rows = matrix.len(),
                    entries = entries.len(),
                    "cached embeddings do not match corpus size, rebuilding"
                );
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "unreadable embedding blob, rebuilding");
            }
        }

        self.build(entries, key).await
    }

    async fn build(&self, entries: &[FaqEntry], key: &CacheKey) -> Result<EmbeddingMatrix> {
        tracing::info!(
            key = %key,
            entries = entries.len(),
            model = self.embedder.model_name(),
            "generating embeddings"
        );

        let questions: Vec<String> = entries.iter().map(|e| e.question.clone()).collect();
        let vectors = self.embedder.embed(&questions).await?;

        if vectors.len() != entries.len() {
            bail!(
                "Embedder returned {} vectors for {} questions",
                vectors.len(),
                entries.len()
            );
        }

        let matrix = EmbeddingMatrix::from_rows(vectors)?;

        let dir = self.dir.clone();
        let path = self.blob_path(key);
        let bytes = matrix.encode();
        let written = tokio::task::spawn_blocking(move || persist(&dir, &path, &bytes))
            .await
            .map_err(anyhow::Error::from)
            .and_then(|r| r);
        if let Err(e) = written {
            tracing::warn!(key = %key, error = %format!("{:#}", e), "could not persist embeddings");
        }

        Ok(matrix)
    }

    async fn load_blocking(&self, key: &CacheKey) -> Result<Option<EmbeddingMatrix>> {
        let cache = self.clone();
        let key = key.clone();
        tokio::task::spawn_blocking(move || cache.load(&key)).await?
    }

    /// List all persisted blobs, sorted by key.
    pub fn list(&self) -> Result<Vec<CachedBlob>> {
        let read_dir = match std::fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to list {}", self.dir.display()))
            }
        };

        let mut blobs = Vec::new();
        for entry in read_dir {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(key) = CacheKey::from_file_name(&name.to_string_lossy()) else {
                continue;
            };
            blobs.push(CachedBlob {
                key,
                path: entry.path(),
                size_bytes: entry.metadata()?.len(),
            });
        }

        blobs.sort_by(|a, b| a.key.as_str().cmp(b.key.as_str()));
        Ok(blobs)
    }

    /// Delete the blob for a single key; returns whether one existed.
    pub fn remove(&self, key: &CacheKey) -> Result<bool> {
        let path = self.blob_path(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }

    /// Delete persisted blobs; returns how many were removed.
    pub fn invalidate(&self, scope: &CacheScope) -> Result<usize> {
        let mut removed = 0;
        for blob in self.list()? {
            let selected = match scope {
                CacheScope::All => true,
                CacheScope::Language(lang) => blob.key.language() == lang,
            };
            if !selected {
                continue;
            }
            match std::fs::remove_file(&blob.path) {
                Ok(()) => removed += 1,
                // Raced with another invalidation.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to remove {}", blob.path.display()))
                }
            }
        }

        tracing::info!(?scope, removed, "invalidated embedding cache");
        Ok(removed)
    }
}

/// Write `bytes` to a temporary file in `dir` and rename it onto `path`.
fn persist(dir: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    tracing::debug!(path = %path.display(), "persisted embeddings");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Embeds each text as `[len, 1.0]` and counts calls.
    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    impl CountingEmbedder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn model_name(&self) -> &str {
            "counting"
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    fn entries(n: usize) -> Vec<FaqEntry> {
        (0..n)
            .map(|i| FaqEntry::new(format!("question {}", "?".repeat(i)), "answer"))
            .collect()
    }

    fn local_key(lang: &str) -> CacheKey {
        CacheKey::derive(
            &SourceIdentity::Local {
                language: lang.to_string(),
            },
            lang,
        )
    }

    fn remote_key(url: &str, lang: &str) -> CacheKey {
        CacheKey::derive(
            &SourceIdentity::Remote {
                url: url.to_string(),
            },
            lang,
        )
    }

    #[test]
    fn test_local_key_is_language() {
        assert_eq!(local_key("pt").as_str(), "pt");
    }

    #[test]
    fn test_remote_key_is_deterministic() {
        let a = remote_key("https://example.com/faq.json", "en");
        let b = remote_key("https://example.com/faq.json", "en");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), URL_DIGEST_LEN + 3);
        assert!(a.as_str().ends_with("_en"));
        assert_eq!(a.language(), "en");
    }

    #[test]
    fn test_remote_keys_differ_by_url_and_language() {
        let a = remote_key("https://example.com/faq.json", "en");
        let b = remote_key("https://example.com/other.json", "en");
        let c = remote_key("https://example.com/faq.json", "pt");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_file_name_roundtrip() {
        let key = remote_key("https://example.com/faq.json", "en");
        assert_eq!(CacheKey::from_file_name(&key.file_name()), Some(key));
        assert_eq!(CacheKey::from_file_name("faq_data_en.json"), None);
        assert_eq!(CacheKey::from_file_name("faq_embeddings_.bin"), None);
    }

    #[test]
    fn test_matrix_encode_decode() {
        let matrix = EmbeddingMatrix::from_rows(vec![vec![1.0, 2.0], vec![-3.5, 0.25]]).unwrap();
        let decoded = EmbeddingMatrix::decode(&matrix.encode()).unwrap();
        assert_eq!(decoded, matrix);
        assert_eq!(decoded.dims(), 2);
    }

    #[test]
    fn test_matrix_decode_rejects_garbage() {
        assert_eq!(
            EmbeddingMatrix::decode(b"NOPE000000000000"),
            Err(CacheError::BadMagic)
        );

        let mut bytes = EmbeddingMatrix::from_rows(vec![vec![1.0, 2.0]])
            .unwrap()
            .encode();
        bytes.pop();
        assert!(matches!(
            EmbeddingMatrix::decode(&bytes),
            Err(CacheError::Truncated { .. })
        ));
    }

    fn header(rows: u32, dims: u32) -> Vec<u8> {
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&rows.to_le_bytes());
        bytes.extend_from_slice(&dims.to_le_bytes());
        bytes
    }

    #[test]
    fn test_matrix_decode_rejects_oversized_header() {
        assert!(matches!(
            EmbeddingMatrix::decode(&header(u32::MAX, u32::MAX)),
            Err(CacheError::Truncated { found: HEADER_LEN, .. })
        ));
        assert_eq!(
            EmbeddingMatrix::decode(&header(u32::MAX, 0)),
            Err(CacheError::ZeroDims {
                rows: u32::MAX as usize
            })
        );
        assert_eq!(
            EmbeddingMatrix::decode(&header(0, 0)),
            Ok(EmbeddingMatrix::default())
        );
    }

    #[tokio::test]
    async fn test_oversized_header_blob_rebuilds() {
        let tmp = TempDir::new().unwrap();
        let embedder = CountingEmbedder::new();
        let cache = EmbeddingCache::new(tmp.path(), embedder.clone());
        let key = local_key("en");
        std::fs::write(cache.blob_path(&key), header(u32::MAX, u32::MAX)).unwrap();

        let matrix = cache.get_or_build(&entries(2), &key).await.unwrap();

        assert_eq!(matrix.len(), 2);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_matrix_rejects_ragged_rows() {
        assert!(matches!(
            EmbeddingMatrix::from_rows(vec![vec![1.0, 2.0], vec![1.0]]),
            Err(CacheError::RaggedRows { row: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_second_call_hits_cache() {
        let tmp = TempDir::new().unwrap();
        let embedder = CountingEmbedder::new();
        let cache = EmbeddingCache::new(tmp.path(), embedder.clone());
        let corpus = entries(3);
        let key = local_key("en");

        let first = cache.get_or_build(&corpus, &key).await.unwrap();
        let second = cache.get_or_build(&corpus, &key).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
        assert!(cache.blob_path(&key).exists());
    }

    #[tokio::test]
    async fn test_empty_corpus_skips_embedder() {
        let tmp = TempDir::new().unwrap();
        let embedder = CountingEmbedder::new();
        let cache = EmbeddingCache::new(tmp.path(), embedder.clone());

        let matrix = cache.get_or_build(&[], &local_key("en")).await.unwrap();

        assert!(matrix.is_empty());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
        assert!(cache.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_row_count_mismatch_rebuilds() {
        let tmp = TempDir::new().unwrap();
        let embedder = CountingEmbedder::new();
        let cache = EmbeddingCache::new(tmp.path(), embedder.clone());
        let key = local_key("en");

        cache.get_or_build(&entries(2), &key).await.unwrap();
        let rebuilt = cache.get_or_build(&entries(3), &key).await.unwrap();

        assert_eq!(rebuilt.len(), 3);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_corrupt_blob_rebuilds() {
        let tmp = TempDir::new().unwrap();
        let embedder = CountingEmbedder::new();
        let cache = EmbeddingCache::new(tmp.path(), embedder.clone());
        let key = local_key("en");
        std::fs::write(cache.blob_path(&key), b"garbage").unwrap();

        let matrix = cache.get_or_build(&entries(1), &key).await.unwrap();

        assert_eq!(matrix.len(), 1);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
        assert!(cache.load(&key).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unwritable_dir_still_returns_matrix() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();
        let embedder = CountingEmbedder::new();
        let cache = EmbeddingCache::new(&blocker, embedder.clone());

        let matrix = cache.get_or_build(&entries(2), &local_key("en")).await.unwrap();

        assert_eq!(matrix.len(), 2);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_by_language_and_all() {
        let tmp = TempDir::new().unwrap();
        let cache = EmbeddingCache::new(tmp.path(), CountingEmbedder::new());
        let corpus = entries(1);

        cache.get_or_build(&corpus, &local_key("en")).await.unwrap();
        cache.get_or_build(&corpus, &local_key("pt")).await.unwrap();
        cache
            .get_or_build(&corpus, &remote_key("https://example.com/faq.json", "en"))
            .await
            .unwrap();
        assert_eq!(cache.list().unwrap().len(), 3);

        let removed = cache
            .invalidate(&CacheScope::Language("en".to_string()))
            .unwrap();
        assert_eq!(removed, 2);

        let remaining = cache.list().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].key.as_str(), "pt");

        assert_eq!(cache.invalidate(&CacheScope::All).unwrap(), 1);
        assert!(cache.list().unwrap().is_empty());
    }

    #[test]
    fn test_list_missing_dir_is_empty() {
        let tmp = TempDir::new().unwrap();
        let cache = EmbeddingCache::new(tmp.path().join("absent"), CountingEmbedder::new());
        assert!(cache.list().unwrap().is_empty());
        assert_eq!(cache.invalidate(&CacheScope::All).unwrap(), 0);
    }
}
