// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Vector index collaborator for pattern embeddings
//!
//! An external index (ANN service, embedded vector DB) can accelerate
//! similarity search. The cortex never awaits it on a latency-sensitive path:
//! writes are queued through [`IndexSync`] and applied by a background task.

use async_trait::async_trait;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::{cosine_similarity, PatternId};

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn insert(&self, id: PatternId, embedding: Vec<f32>) -> Result<()>;

    /// Ids of the `k` nearest embeddings, most similar first
    async fn search(&self, embedding: &[f32], k: usize) -> Result<Vec<PatternId>>;

    async fn delete(&self, id: PatternId) -> Result<()>;
}

/// Brute-force cosine index held in memory
pub struct InMemoryVectorIndex {
    entries: Arc<RwLock<HashMap<PatternId, Vec<f32>>>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn insert(&self, id: PatternId, embedding: Vec<f32>) -> Result<()> {
        self.entries.write().await.insert(id, embedding);
        Ok(())
    }

    async fn search(&self, embedding: &[f32], k: usize) -> Result<Vec<PatternId>> {
        let entries = self.entries.read().await;
        Ok(rank_by_similarity(
            entries.iter().map(|(id, e)| (*id, e.as_slice())),
            embedding,
            k,
        ))
    }

    async fn delete(&self, id: PatternId) -> Result<()> {
        self.entries.write().await.remove(&id);
        Ok(())
    }
}

/// Top `k` ids by cosine similarity to `query`. Ties break on id.
pub fn rank_by_similarity<'a, I>(entries: I, query: &[f32], k: usize) -> Vec<PatternId>
where
    I: Iterator<Item = (PatternId, &'a [f32])>,
{
    let mut scored: Vec<(PatternId, f32)> = entries
        .map(|(id, e)| (id, cosine_similarity(e, query)))
        .collect();
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    scored.into_iter().take(k).map(|(id, _)| id).collect()
}

#[derive(Debug)]
enum IndexOp {
    Insert { id: PatternId, embedding: Vec<f32> },
    Delete { id: PatternId },
}

/// Fire-and-forget write queue in front of a [`VectorIndex`]
#[derive(Clone)]
pub struct IndexSync {
    sender: mpsc::UnboundedSender<IndexOp>,
}

impl IndexSync {
    /// Spawn the drain task on the current tokio runtime.
    ///
    /// The task ends once every `IndexSync` clone has been dropped.
    pub fn spawn(index: Arc<dyn VectorIndex>) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::unbounded_channel::<IndexOp>();

        let handle = tokio::spawn(async move {
            while let Some(op) = receiver.recv().await {
                let result = match &op {
                    IndexOp::Insert { id, embedding } => index.insert(*id, embedding.clone()).await,
                    IndexOp::Delete { id } => index.delete(*id).await,
                };
                if let Err(e) = result {
                    warn!(?op, "Vector index update failed: {}", e);
                }
            }
            debug!("Vector index sync task stopped");
        });

        (Self { sender }, handle)
    }

    pub fn insert(&self, id: PatternId, embedding: Vec<f32>) {
        self.enqueue(IndexOp::Insert { id, embedding });
    }

    pub fn delete(&self, id: PatternId) {
        self.enqueue(IndexOp::Delete { id });
    }

    fn enqueue(&self, op: IndexOp) {
        if self.sender.send(op).is_err() {
            debug!("Vector index sync task is gone, dropping update");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_search_orders_by_similarity() {
        let index = InMemoryVectorIndex::new();
        let near = PatternId::new();
        let far = PatternId::new();
        index.insert(near, vec![1.0, 0.1]).await.unwrap();
        index.insert(far, vec![0.0, 1.0]).await.unwrap();

        let hits = index.search(&[1.0, 0.0], 5).await.unwrap();
        assert_eq!(hits, vec![near, far]);

        index.delete(near).await.unwrap();
        assert_eq!(index.search(&[1.0, 0.0], 1).await.unwrap(), vec![far]);
    }

    #[tokio::test]
    async fn test_index_sync_applies_queued_ops() {
        let index = Arc::new(InMemoryVectorIndex::new());
        let (sync, handle) = IndexSync::spawn(index.clone());

        let a = PatternId::new();
        let b = PatternId::new();
        sync.insert(a, vec![1.0, 0.0]);
        sync.insert(b, vec![0.0, 1.0]);
        sync.delete(a);
        drop(sync);

        handle.await.unwrap();
        assert_eq!(index.len().await, 1);
        assert_eq!(index.search(&[0.0, 1.0], 1).await.unwrap(), vec![b]);
    }

    #[test]
    fn test_search_on_empty_index() {
        let index = InMemoryVectorIndex::new();
        let hits = tokio_test::block_on(index.search(&[1.0, 0.0], 3)).unwrap();
        assert!(hits.is_empty());
        assert!(tokio_test::block_on(index.is_empty()));
    }

    struct FailingIndex;

    #[async_trait]
    impl VectorIndex for FailingIndex {
        async fn insert(&self, _id: PatternId, _embedding: Vec<f32>) -> Result<()> {
            anyhow::bail!("index offline")
        }

        async fn search(&self, _embedding: &[f32], _k: usize) -> Result<Vec<PatternId>> {
            anyhow::bail!("index offline")
        }

        async fn delete(&self, _id: PatternId) -> Result<()> {
            anyhow::bail!("index offline")
        }
    }

    #[tokio::test]
    async fn test_index_failures_do_not_stop_the_worker() {
        let (sync, handle) = IndexSync::spawn(Arc::new(FailingIndex));
        sync.insert(PatternId::new(), vec![1.0]);
        sync.delete(PatternId::new());
        drop(sync);

        handle.await.unwrap();
    }
}
