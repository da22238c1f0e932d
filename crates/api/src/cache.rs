use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use index::Embedder;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct Cache {
    embeddings: DashMap<String, Vec<f32>>,
    max_entries: usize,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl Cache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            embeddings: DashMap::new(),
            max_entries,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    /// Cache an embedding
    pub fn set_embedding(&self, text: &str, embedding: Vec<f32>) {
        if self.max_entries == 0 {
            return;
        }
        if self.embeddings.len() >= self.max_entries {
            // Simple eviction: clear 25% when full
            let to_remove: Vec<_> = self.embeddings.iter()
                .take((self.max_entries / 4).max(1))
                .map(|r| r.key().clone())
                .collect();
            for key in to_remove {
                self.embeddings.remove(&key);
            }
        }
        let key = self.hash_text(text);
        self.embeddings.insert(key, embedding);
    }

    pub fn get_embedding(&self, text: &str) -> Option<Vec<f32>> {
        let key = self.hash_text(text);
        let found = self.embeddings.get(&key).map(|r| r.value().clone());
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    fn hash_text(&self, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            embeddings_cached: self.embeddings.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct CacheStats {
    pub embeddings_cached: usize,
    pub hits: usize,
    pub misses: usize,
}

/// Serves repeated query embeddings from the cache.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Arc<Cache>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, cache: Arc<Cache>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(embedding) = self.cache.get_embedding(text) {
            return Ok(embedding);
        }
        let embedding = self.inner.embed(text).await?;
        self.cache.set_embedding(text, embedding.clone());
        Ok(embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingEmbedder(AtomicUsize);

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(vec![text.len() as f32])
        }
    }

    #[tokio::test]
    async fn repeated_queries_hit_the_cache() {
        let inner = Arc::new(CountingEmbedder(AtomicUsize::new(0)));
        let cache = Arc::new(Cache::new(100));
        let embedder = CachedEmbedder::new(inner.clone(), cache.clone());

        assert_eq!(embedder.embed("apne").await.unwrap(), vec![4.0]);
        assert_eq!(embedder.embed("apne").await.unwrap(), vec![4.0]);
        embedder.embed("sepsis").await.unwrap();

        assert_eq!(inner.0.load(Ordering::SeqCst), 2);
        let stats = cache.stats();
        assert_eq!(stats.embeddings_cached, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
    }

    #[test]
    fn eviction_keeps_cache_bounded() {
        let cache = Cache::new(4);
        for i in 0..10 {
            cache.set_embedding(&format!("query {i}"), vec![i as f32]);
        }
        assert!(cache.stats().embeddings_cached <= 4);
        assert_eq!(cache.get_embedding("query 9"), Some(vec![9.0]));
    }
}
