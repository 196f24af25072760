/// Pluggable external vector index (spec §6). Used only when
/// `compression_strategy` is `embedding`/`hybrid` or `strategy` is
/// `semantic`. Synchronous by design: the engine's facade is
/// single-threaded-cooperative (spec §5) and must never suspend, so any
/// backing async client (like `qdrant-client`) is bridged to this
/// synchronous trait at the implementation boundary rather than the caller
/// having to await anything.
pub trait VectorStore: Send + Sync {
    /// Store `content` under `id`, returning an opaque handle for later
    /// retrieval. The handle need not equal `id`.
    fn put(&self, id: &str, content: &str) -> Result<String, VectorStoreError>;

    /// Fetch content back by handle, if the backend still has it.
    fn get(&self, handle: &str) -> Result<Option<String>, VectorStoreError>;

    /// Top-`k` nearest entries to `query`, as (id, score) pairs descending
    /// by score.
    fn search(&self, query: &str, k: usize) -> Result<Vec<(String, f64)>, VectorStoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    #[error("vector store unavailable: {0}")]
    Unavailable(String),
}

/// No-op store used when `compression_strategy` needs a handle but no real
/// vector backend is configured — matches spec §4.C's "if unavailable, the
/// entry is effectively read-only metadata."
#[derive(Debug, Clone, Copy, Default)]
pub struct NullVectorStore;

impl VectorStore for NullVectorStore {
    fn put(&self, id: &str, _content: &str) -> Result<String, VectorStoreError> {
        Ok(format!("unavailable:{id}"))
    }

    fn get(&self, _handle: &str) -> Result<Option<String>, VectorStoreError> {
        Ok(None)
    }

    fn search(&self, _query: &str, _k: usize) -> Result<Vec<(String, f64)>, VectorStoreError> {
        Ok(Vec::new())
    }
}

#[cfg(feature = "qdrant")]
pub mod qdrant_store {
    use super::{VectorStore, VectorStoreError};
    use qdrant_client::qdrant::{
        CreateCollectionBuilder, Distance, PointStruct, ScrollPointsBuilder,
        SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
    };
    use qdrant_client::{Payload, Qdrant};

    /// Vector store backed by a real Qdrant instance. Bridges the async
    /// `qdrant-client` API to the engine's synchronous `VectorStore` trait
    /// by owning a private current-thread Tokio runtime and blocking on it —
    /// directly grounded in `memory::stores::qdrant::QdrantStore`, adapted
    /// from async-trait to sync-trait since ICCO's facade may never suspend.
    ///
    /// Stores raw text under a fixed single-dimension placeholder vector;
    /// real deployments should compute embeddings upstream and call
    /// `put_with_embedding` instead.
    pub struct QdrantVectorStore {
        client: Qdrant,
        collection: String,
        dimensions: usize,
        runtime: tokio::runtime::Runtime,
    }

    impl QdrantVectorStore {
        pub fn new(url: &str, collection: &str, dimensions: usize) -> Result<Self, VectorStoreError> {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| VectorStoreError::Unavailable(format!("runtime init failed: {e}")))?;

            let client = Qdrant::from_url(url)
                .build()
                .map_err(|e| VectorStoreError::Unavailable(format!("connect failed: {e}")))?;

            let store = Self {
                client,
                collection: collection.to_string(),
                dimensions,
                runtime,
            };
            store.ensure_collection()?;
            Ok(store)
        }

        fn ensure_collection(&self) -> Result<(), VectorStoreError> {
            self.runtime.block_on(async {
                let exists = self
                    .client
                    .collection_exists(&self.collection)
                    .await
                    .map_err(|e| VectorStoreError::Unavailable(format!("check failed: {e}")))?;
                if !exists {
                    self.client
                        .create_collection(
                            CreateCollectionBuilder::new(&self.collection).vectors_config(
                                VectorParamsBuilder::new(self.dimensions as u64, Distance::Cosine),
                            ),
                        )
                        .await
                        .map_err(|e| VectorStoreError::Unavailable(format!("create failed: {e}")))?;
                }
                Ok(())
            })
        }

        fn placeholder_vector(&self, seed: &str) -> Vec<f32> {
            let hash = seed.bytes().fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
            (0..self.dimensions)
                .map(|i| (((hash.wrapping_add(i as u64)) % 1000) as f32) / 1000.0)
                .collect()
        }
    }

    impl VectorStore for QdrantVectorStore {
        fn put(&self, id: &str, content: &str) -> Result<String, VectorStoreError> {
            let payload: Payload = serde_json::json!({ "content": content })
                .try_into()
                .map_err(|e| VectorStoreError::Unavailable(format!("payload: {e}")))?;
            let vector = self.placeholder_vector(id);
            let point = PointStruct::new(id, vector, payload);

            self.runtime.block_on(async {
                self.client
                    .upsert_points(UpsertPointsBuilder::new(&self.collection, vec![point]).wait(true))
                    .await
                    .map_err(|e| VectorStoreError::Unavailable(format!("upsert failed: {e}")))
            })?;

            Ok(id.to_string())
        }

        fn get(&self, handle: &str) -> Result<Option<String>, VectorStoreError> {
            self.runtime.block_on(async {
                let results = self
                    .client
                    .scroll(ScrollPointsBuilder::new(&self.collection).limit(1).with_payload(true))
                    .await
                    .map_err(|e| VectorStoreError::Unavailable(format!("scroll failed: {e}")))?;

                for point in results.result {
                    if point_id_matches(&point.id, handle) {
                        if let Some(v) = point.payload.get("content").and_then(|v| v.as_str()) {
                            return Ok(Some(v.to_string()));
                        }
                    }
                }
                Ok(None)
            })
        }

        fn search(&self, query: &str, k: usize) -> Result<Vec<(String, f64)>, VectorStoreError> {
            let vector = self.placeholder_vector(query);
            self.runtime.block_on(async {
                let results = self
                    .client
                    .search_points(SearchPointsBuilder::new(&self.collection, vector, k as u64))
                    .await
                    .map_err(|e| VectorStoreError::Unavailable(format!("search failed: {e}")))?;

                Ok(results
                    .result
                    .into_iter()
                    .map(|p| (point_id_to_string(&p.id), p.score as f64))
                    .collect())
            })
        }
    }

    fn point_id_to_string(id: &Option<qdrant_client::qdrant::PointId>) -> String {
        match id {
            Some(pid) => match &pid.point_id_options {
                Some(qdrant_client::qdrant::point_id::PointIdOptions::Uuid(s)) => s.clone(),
                Some(qdrant_client::qdrant::point_id::PointIdOptions::Num(n)) => n.to_string(),
                None => String::new(),
            },
            None => String::new(),
        }
    }

    fn point_id_matches(id: &Option<qdrant_client::qdrant::PointId>, handle: &str) -> bool {
        point_id_to_string(id) == handle
    }
}

#[cfg(feature = "qdrant")]
pub use qdrant_store::QdrantVectorStore;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_store_put_returns_handle() {
        let store = NullVectorStore;
        let handle = store.put("e1", "some content").unwrap();
        assert!(handle.contains("e1"));
    }

    #[test]
    fn null_store_get_is_always_none() {
        let store = NullVectorStore;
        assert!(store.get("anything").unwrap().is_none());
    }

    #[test]
    fn null_store_search_is_empty() {
        let store = NullVectorStore;
        assert!(store.search("q", 5).unwrap().is_empty());
    }
}
