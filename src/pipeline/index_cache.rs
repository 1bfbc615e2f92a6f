//! Persisted embedding index, keyed by a fingerprint of the sample corpus.
//!
//! The cache is only reused when the fingerprint, encoder model, dimensionality
//! and entry count all match; anything else triggers a rebuild and rewrite.

use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::embedding::Encoder;
use crate::error::EmbeddingError;
use crate::pipeline::normalizer::NormalizedContext;
use crate::pipeline::similarity::EmbeddingIndex;
use crate::pipeline::types::SampleRecord;

/// Hex SHA-256 over the encoder identity and every sample's embedded text and labels.
pub fn corpus_fingerprint(
    samples: &[SampleRecord],
    model: &str,
    dims: usize,
    body_snippet_chars: usize,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update(dims.to_le_bytes());
    hasher.update((samples.len() as u64).to_le_bytes());
    for sample in samples {
        let text = NormalizedContext::from_record(sample, body_snippet_chars).embedding_text();
        for part in [
            text.as_str(),
            sample.category.as_str(),
            sample.priority.as_str(),
        ] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
    }
    hex::encode(hasher.finalize())
}

/// Read a cached index, returning `None` when it is missing, unreadable or stale.
pub async fn load(
    path: &Path,
    fingerprint: &str,
    encoder: &dyn Encoder,
    expected_len: usize,
) -> Option<EmbeddingIndex> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "No usable index cache");
            return None;
        }
    };
    let index: EmbeddingIndex = match serde_json::from_slice(&raw) {
        Ok(index) => index,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Index cache is corrupt, rebuilding");
            return None;
        }
    };

    let fresh = index.fingerprint == fingerprint
        && index.model == encoder.model_name()
        && index.dims == encoder.dims()
        && index.len() == expected_len
        && index.entries.iter().all(|e| e.vector.len() == index.dims);
    if !fresh {
        info!(path = %path.display(), "Index cache is stale, rebuilding");
        return None;
    }
    Some(index)
}

/// Write the index as JSON, creating parent directories as needed.
pub async fn save(path: &Path, index: &EmbeddingIndex) -> Result<(), EmbeddingError> {
    let cache_err = |reason: String| EmbeddingError::Cache {
        path: path.to_path_buf(),
        reason,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| cache_err(e.to_string()))?;
    }
    let payload = serde_json::to_vec(index).map_err(|e| cache_err(e.to_string()))?;
    tokio::fs::write(path, payload)
        .await
        .map_err(|e| cache_err(e.to_string()))
}

/// Load the cached index when fresh, otherwise encode the corpus and
/// best-effort persist the result.
pub async fn load_or_build(
    samples: &[SampleRecord],
    encoder: &dyn Encoder,
    cache_path: Option<&Path>,
    body_snippet_chars: usize,
) -> Result<EmbeddingIndex, EmbeddingError> {
    let fingerprint = corpus_fingerprint(
        samples,
        encoder.model_name(),
        encoder.dims(),
        body_snippet_chars,
    );

    if let Some(path) = cache_path {
        if let Some(index) = load(path, &fingerprint, encoder, samples.len()).await {
            info!(path = %path.display(), entries = index.len(), "Loaded embedding index from cache");
            return Ok(index);
        }
    }

    let index = EmbeddingIndex::build(samples, encoder, body_snippet_chars, fingerprint).await?;

    if let Some(path) = cache_path {
        if let Err(e) = save(path, &index).await {
            warn!(error = %e, "Failed to persist embedding index");
        }
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::embedding::HashingEncoder;
    use crate::pipeline::types::{EmailRecord, Priority};

    /// Hashing encoder that counts how many texts it was asked to encode.
    struct CountingEncoder {
        inner: HashingEncoder,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Encoder for CountingEncoder {
        fn model_name(&self) -> &str {
            self.inner.model_name()
        }
        fn dims(&self) -> usize {
            self.inner.dims()
        }
        async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.calls.fetch_add(texts.len(), Ordering::SeqCst);
            self.inner.encode(texts).await
        }
    }

    fn samples() -> Vec<SampleRecord> {
        vec![
            EmailRecord::new("d", "a@air.com", "Flight", "seat 12A").with_labels("Travel", Priority::Normal),
            EmailRecord::new("d", "b@bank.com", "Statement", "balance").with_labels("Banking", Priority::High),
        ]
    }

    #[test]
    fn fingerprint_changes_with_content_and_labels() {
        let base = samples();
        let fp = corpus_fingerprint(&base, "m", 8, 280);
        assert_eq!(fp, corpus_fingerprint(&base, "m", 8, 280));
        assert_eq!(fp.len(), 64);

        let mut relabeled = base.clone();
        relabeled[0].category = "Work".into();
        assert_ne!(fp, corpus_fingerprint(&relabeled, "m", 8, 280));

        let mut edited = base.clone();
        edited[1].body = "balance due".into();
        assert_ne!(fp, corpus_fingerprint(&edited, "m", 8, 280));

        assert_ne!(fp, corpus_fingerprint(&base, "other-model", 8, 280));
        assert_ne!(fp, corpus_fingerprint(&base, "m", 16, 280));
    }

    #[tokio::test]
    async fn reuses_cache_until_corpus_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("index.json");
        let calls = Arc::new(AtomicUsize::new(0));
        let encoder = CountingEncoder {
            inner: HashingEncoder::new(16),
            calls: Arc::clone(&calls),
        };

        let first = load_or_build(&samples(), &encoder, Some(&path), 280).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(path.exists());

        let second = load_or_build(&samples(), &encoder, Some(&path), 280).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2, "cache hit must not re-encode");
        assert_eq!(first, second);

        let mut changed = samples();
        changed.push(
            EmailRecord::new("d", "c@air.com", "Hotel", "room").with_labels("Travel", Priority::Normal),
        );
        let third = load_or_build(&changed, &encoder, Some(&path), 280).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(third.len(), 3);
        assert_ne!(third.fingerprint, first.fingerprint);
    }

    #[tokio::test]
    async fn corrupt_cache_is_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        std::fs::write(&path, b"{not json").unwrap();

        let encoder = HashingEncoder::new(16);
        let index = load_or_build(&samples(), &encoder, Some(&path), 280).await.unwrap();
        assert_eq!(index.len(), 2);

        let reloaded = load(&path, &index.fingerprint, &encoder, 2).await;
        assert_eq!(reloaded, Some(index));
    }

    #[tokio::test]
    async fn no_cache_path_builds_in_memory() {
        let encoder = HashingEncoder::new(16);
        let index = load_or_build(&samples(), &encoder, None, 280).await.unwrap();
        assert_eq!(index.dims, 16);
        assert_eq!(index.model, "hashing-v1");
    }
}
