use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cal_log_harness::{
    CachedEmbedder, EmbedError, Embedder, EmbeddingCache, HashingEmbedder, SqliteEmbeddingCache,
};
use tempfile::tempdir;

/// Counts how many texts reach the wrapped embedder.
struct CountingEmbedder {
    inner: HashingEmbedder,
    calls: AtomicUsize,
}

#[async_trait]
impl Embedder for CountingEmbedder {
    fn model_name(&self) -> &str {
        "counting"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, EmbedError> {
        self.calls.fetch_add(texts.len(), Ordering::SeqCst);
        self.inner.embed(texts).await
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn put_then_get_returns_vectors() {
    let dir = tempdir().unwrap();
    let cache = SqliteEmbeddingCache::new(dir.path().join("cache.sqlite")).unwrap();
    let texts = strings(&["alpha", "beta"]);
    let vectors = vec![vec![0.5, -0.25, 1.0], vec![0.0, 2.0, -1.5]];
    cache.put_many("m", &texts, &vectors).await.unwrap();

    let got = cache.get_many("m", &strings(&["beta", "gamma", "alpha"])).await.unwrap();
    assert_eq!(got[0].as_deref(), Some(&vectors[1][..]));
    assert!(got[1].is_none());
    assert_eq!(got[2].as_deref(), Some(&vectors[0][..]));

    // Other models never see these rows.
    let other = cache.get_many("n", &texts).await.unwrap();
    assert!(other.iter().all(|v| v.is_none()));

    let stats = cache.stats().await.unwrap();
    assert_eq!(stats.rows, 2);
    assert_eq!(stats.total_hits, 2);
}

#[tokio::test]
async fn cached_embedder_only_embeds_misses() {
    let dir = tempdir().unwrap();
    let cache = Arc::new(SqliteEmbeddingCache::new(dir.path().join("cache.sqlite")).unwrap());
    let embedder = CachedEmbedder::new(
        CountingEmbedder {
            inner: HashingEmbedder::new(32),
            calls: AtomicUsize::new(0),
        },
        cache.clone(),
    );

    let first = embedder.embed(&strings(&["one text", "two text"])).await.unwrap();
    assert_eq!(embedder.inner().calls.load(Ordering::SeqCst), 2);

    let second = embedder
        .embed(&strings(&["two text", "three text", "one text"]))
        .await
        .unwrap();
    assert_eq!(embedder.inner().calls.load(Ordering::SeqCst), 3);
    assert_eq!(second[0], first[1]);
    assert_eq!(second[2], first[0]);
    assert_eq!(second[1], HashingEmbedder::new(32).embed_one("three text"));

    assert_eq!(cache.stats().await.unwrap().rows, 3);
}

#[tokio::test]
async fn prune_keeps_at_most_max_rows() {
    let dir = tempdir().unwrap();
    let cache = SqliteEmbeddingCache::new(dir.path().join("cache.sqlite")).unwrap();
    let texts: Vec<String> = (0..6).map(|i| format!("text {i}")).collect();
    let vectors: Vec<Vec<f64>> = (0..6).map(|i| vec![i as f64]).collect();
    cache.put_many("m", &texts, &vectors).await.unwrap();

    let stats = cache.prune(4).await.unwrap();
    assert_eq!(stats.deleted, 2);
    assert_eq!(stats.remaining, 4);

    let stats = cache.prune(10).await.unwrap();
    assert_eq!(stats.deleted, 0);
    assert_eq!(stats.remaining, 4);
}

#[tokio::test]
async fn cache_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sub").join("cache.sqlite");
    {
        let cache = SqliteEmbeddingCache::new(&path).unwrap();
        cache
            .put_many("m", &strings(&["kept"]), &[vec![1.0, 2.0]])
            .await
            .unwrap();
    }
    let cache = SqliteEmbeddingCache::new(&path).unwrap();
    let got = cache.get_many("m", &strings(&["kept"])).await.unwrap();
    assert_eq!(got[0], Some(vec![1.0, 2.0]));
}
