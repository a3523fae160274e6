//! SQLite-backed cache for text embeddings.
//!
//! Rows are keyed by `blake3(model | text)`, so switching embedding models
//! never returns stale vectors. [`CachedEmbedder`] wraps any [`Embedder`] and
//! only sends cache misses to it.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::config::ENV_EMBED_CACHE_PATH;
use crate::embedder::{EmbedError, Embedder};

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingCacheError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache lock poisoned")]
    Poisoned,
    #[error("task join error: {0}")]
    Join(String),
    #[error("stored vector for {key_hash} is corrupt")]
    Corrupt { key_hash: String },
}

#[async_trait]
pub trait EmbeddingCache: Send + Sync {
    /// One slot per text, `None` on a miss.
    async fn get_many(&self, model: &str, texts: &[String]) -> Result<Vec<Option<Vec<f64>>>, EmbeddingCacheError>;
    async fn put_many(&self, model: &str, texts: &[String], vectors: &[Vec<f64>]) -> Result<(), EmbeddingCacheError>;
}

#[derive(Clone)]
pub struct SqliteEmbeddingCache {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CachePruneStats {
    pub deleted: usize,
    pub remaining: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub rows: usize,
    pub total_hits: i64,
}

impl SqliteEmbeddingCache {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, EmbeddingCacheError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;\
             PRAGMA synchronous=NORMAL;\
             CREATE TABLE IF NOT EXISTS embedding_cache (\
               key_hash TEXT PRIMARY KEY,\
               model TEXT NOT NULL,\
               dim INTEGER NOT NULL,\
               vector BLOB NOT NULL,\
               created_at INTEGER NOT NULL,\
               updated_at INTEGER NOT NULL,\
               hit_count INTEGER NOT NULL DEFAULT 0\
             );",
        )?;

        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var(ENV_EMBED_CACHE_PATH) {
            return PathBuf::from(path);
        }
        PathBuf::from(".cal_log_embeddings.sqlite")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_conn<F, R>(&self, f: F) -> Result<R, EmbeddingCacheError>
    where
        F: FnOnce(&Connection) -> Result<R, EmbeddingCacheError>,
    {
        let guard = self.conn.lock().map_err(|_| EmbeddingCacheError::Poisoned)?;
        f(&guard)
    }

    pub async fn stats(&self) -> Result<CacheStats, EmbeddingCacheError> {
        let conn = self.clone();
        tokio::task::spawn_blocking(move || {
            conn.with_conn(|conn| {
                let (rows, hits): (i64, Option<i64>) = conn.query_row(
                    "SELECT COUNT(*), SUM(hit_count) FROM embedding_cache",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?;
                Ok(CacheStats {
                    rows: rows.max(0) as usize,
                    total_hits: hits.unwrap_or(0),
                })
            })
        })
        .await
        .map_err(|e| EmbeddingCacheError::Join(e.to_string()))?
    }

    /// Keep the `max_rows` most recently used rows.
    pub async fn prune(&self, max_rows: usize) -> Result<CachePruneStats, EmbeddingCacheError> {
        let conn = self.clone();
        tokio::task::spawn_blocking(move || {
            conn.with_conn(|conn| {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM embedding_cache", [], |row| row.get(0))?;
                let keep = max_rows as i64;
                let mut deleted = 0usize;
                if count > keep {
                    deleted = conn.execute(
                        "DELETE FROM embedding_cache WHERE key_hash IN (\
                            SELECT key_hash FROM embedding_cache \
                            ORDER BY updated_at DESC, created_at DESC LIMIT -1 OFFSET ?1\
                         )",
                        params![keep],
                    )?;
                }
                let remaining: i64 = conn.query_row("SELECT COUNT(*) FROM embedding_cache", [], |row| row.get(0))?;
                Ok(CachePruneStats {
                    deleted,
                    remaining: remaining.max(0) as usize,
                })
            })
        })
        .await
        .map_err(|e| EmbeddingCacheError::Join(e.to_string()))?
    }
}

#[async_trait]
impl EmbeddingCache for SqliteEmbeddingCache {
    async fn get_many(&self, model: &str, texts: &[String]) -> Result<Vec<Option<Vec<f64>>>, EmbeddingCacheError> {
        let keys: Vec<String> = texts.iter().map(|t| cache_key(model, t)).collect();
        let conn = self.clone();
        tokio::task::spawn_blocking(move || {
            conn.with_conn(|conn| {
                let now = now_epoch();
                let mut stmt = conn.prepare("SELECT dim, vector FROM embedding_cache WHERE key_hash = ?1")?;
                let mut out = Vec::with_capacity(keys.len());
                for key in &keys {
                    let row: Option<(i64, Vec<u8>)> = stmt
                        .query_row(params![key], |row| Ok((row.get(0)?, row.get(1)?)))
                        .optional()?;
                    match row {
                        Some((dim, blob)) => {
                            let v = decode_vector(&blob, dim as usize).ok_or_else(|| {
                                EmbeddingCacheError::Corrupt {
                                    key_hash: key.clone(),
                                }
                            })?;
                            conn.execute(
                                "UPDATE embedding_cache \
                                 SET hit_count = hit_count + 1, updated_at = ?1 \
                                 WHERE key_hash = ?2",
                                params![now, key],
                            )?;
                            out.push(Some(v));
                        }
                        None => out.push(None),
                    }
                }
                Ok(out)
            })
        })
        .await
        .map_err(|e| EmbeddingCacheError::Join(e.to_string()))?
    }

    async fn put_many(&self, model: &str, texts: &[String], vectors: &[Vec<f64>]) -> Result<(), EmbeddingCacheError> {
        let rows: Vec<(String, Vec<f64>)> = texts
            .iter()
            .zip(vectors)
            .map(|(t, v)| (cache_key(model, t), v.clone()))
            .collect();
        let model = model.to_string();
        let conn = self.clone();
        tokio::task::spawn_blocking(move || {
            conn.with_conn(|conn| {
                let now = now_epoch();
                for (key, v) in &rows {
                    conn.execute(
                        "INSERT INTO embedding_cache (key_hash, model, dim, vector, created_at, updated_at) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                         ON CONFLICT(key_hash) DO UPDATE SET \
                            dim = excluded.dim, \
                            vector = excluded.vector, \
                            updated_at = excluded.updated_at",
                        params![key, model, v.len() as i64, encode_vector(v), now, now],
                    )?;
                }
                Ok(())
            })
        })
        .await
        .map_err(|e| EmbeddingCacheError::Join(e.to_string()))?
    }
}

/// Embedder that consults an [`EmbeddingCache`] first.
///
/// Cache failures are logged and the batch is embedded directly.
pub struct CachedEmbedder<E> {
    inner: E,
    cache: Arc<dyn EmbeddingCache>,
}

impl<E: Embedder> CachedEmbedder<E> {
    pub fn new(inner: E, cache: Arc<dyn EmbeddingCache>) -> Self {
        Self { inner, cache }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

#[async_trait]
impl<E: Embedder> Embedder for CachedEmbedder<E> {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, EmbedError> {
        let model = self.inner.model_name().to_string();
        let cached = match self.cache.get_many(&model, texts).await {
            Ok(c) => c,
            Err(err) => {
                warn!(error = %err, "embedding cache read failed; embedding directly");
                return self.inner.embed(texts).await;
            }
        };

        let miss_idx: Vec<usize> = cached
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.is_none().then_some(i))
            .collect();
        debug!(hits = texts.len() - miss_idx.len(), misses = miss_idx.len(), "embedding cache lookup");
        if miss_idx.is_empty() {
            return Ok(cached.into_iter().flatten().collect());
        }

        let miss_texts: Vec<String> = miss_idx.iter().map(|&i| texts[i].clone()).collect();
        let fresh = self.inner.embed(&miss_texts).await?;
        if fresh.len() != miss_texts.len() {
            return Err(EmbedError::CountMismatch {
                expected: miss_texts.len(),
                got: fresh.len(),
            });
        }
        if let Err(err) = self.cache.put_many(&model, &miss_texts, &fresh).await {
            warn!(error = %err, "embedding cache write failed");
        }

        let mut out = cached;
        for (slot, v) in miss_idx.into_iter().zip(fresh) {
            out[slot] = Some(v);
        }
        Ok(out.into_iter().flatten().collect())
    }
}

pub fn cache_key(model: &str, text: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(model.as_bytes());
    hasher.update(b"|");
    hasher.update(text.as_bytes());
    hasher.finalize().to_hex().to_string()
}

fn encode_vector(v: &[f64]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_vector(blob: &[u8], dim: usize) -> Option<Vec<f64>> {
    if blob.len() != dim * 8 {
        return None;
    }
    Some(
        blob.chunks_exact(8)
            .map(|c| {
                let mut b = [0u8; 8];
                b.copy_from_slice(c);
                f64::from_le_bytes(b)
            })
            .collect(),
    )
}

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_depends_on_model_and_text() {
        assert_ne!(cache_key("m1", "hello"), cache_key("m2", "hello"));
        assert_ne!(cache_key("m1", "hello"), cache_key("m1", "hello!"));
        assert_eq!(cache_key("m1", "hello"), cache_key("m1", "hello"));
    }

    #[test]
    fn vector_blob_round_trips() {
        let v = vec![0.5, -1.25, 3.0];
        assert_eq!(decode_vector(&encode_vector(&v), 3), Some(v));
        assert_eq!(decode_vector(&[0u8; 7], 1), None);
    }
}
