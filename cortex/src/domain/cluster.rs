// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Cluster Index
//!
//! Approximate k-means index over pattern embeddings, used to prune retrieval
//! candidates to the members of the few clusters nearest the query.
//!
//! Clusters hold pattern ids and a derived centroid only; the pattern store
//! owns the patterns. Removing a pattern therefore just drops its id from a
//! set and refreshes that cluster's centroid from the store.
//!
//! - **Incremental insert:** join the most similar cluster when similarity
//!   clears `join_threshold`, or when the index is already at its cluster
//!   target; otherwise seed a new cluster at the embedding.
//! - **Rebuild:** k-means++ seeding followed by a fixed number of cosine
//!   reassignment rounds, with `k = min(num_clusters, ceil(n / 5))`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeSet, HashMap};

use super::pattern::PatternId;
use super::vector::{cosine_similarity, mean};

/// Patterns per cluster targeted by a rebuild.
const PATTERNS_PER_CLUSTER: usize = 5;

pub type ClusterId = u64;

#[derive(Debug, Clone)]
pub struct Cluster {
    pub id: ClusterId,
    pub centroid: Vec<f32>,
    pub members: BTreeSet<PatternId>,
}

pub struct ClusterIndex {
    clusters: Vec<Cluster>,
    membership: HashMap<PatternId, ClusterId>,
    num_clusters: usize,
    join_threshold: f32,
    iterations: usize,
    next_id: ClusterId,
    rng: StdRng,
}

impl ClusterIndex {
    pub fn new(num_clusters: usize, join_threshold: f32, iterations: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            clusters: Vec::new(),
            membership: HashMap::new(),
            num_clusters: num_clusters.max(1),
            join_threshold,
            iterations,
            next_id: 0,
            rng,
        }
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn num_clusters(&self) -> usize {
        self.num_clusters
    }

    pub fn set_num_clusters(&mut self, num_clusters: usize) {
        self.num_clusters = num_clusters.max(1);
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    pub fn cluster_of(&self, id: &PatternId) -> Option<ClusterId> {
        self.membership.get(id).copied()
    }

    pub fn clear(&mut self) {
        self.clusters.clear();
        self.membership.clear();
    }

    /// Assign a freshly inserted pattern to a cluster. Returns the cluster id.
    pub fn insert(&mut self, id: PatternId, embedding: &[f32]) -> ClusterId {
        if let Some(existing) = self.membership.get(&id).copied() {
            return existing;
        }

        let best = self
            .clusters
            .iter()
            .enumerate()
            .map(|(i, c)| (i, cosine_similarity(&c.centroid, embedding)))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let at_target = self.clusters.len() >= self.num_clusters;
        match best {
            Some((idx, sim)) if sim >= self.join_threshold || at_target => {
                let cluster = &mut self.clusters[idx];
                let n = cluster.members.len() as f32;
                if cluster.centroid.len() == embedding.len() {
                    for (c, x) in cluster.centroid.iter_mut().zip(embedding.iter()) {
                        *c = (*c * n + x) / (n + 1.0);
                    }
                }
                cluster.members.insert(id);
                self.membership.insert(id, cluster.id);
                cluster.id
            }
            _ => self.seed_cluster(id, embedding),
        }
    }

    /// Drop a pattern id and refresh the centroid of the cluster it left.
    pub fn remove<'a, F>(&mut self, id: &PatternId, lookup: F) -> bool
    where
        F: Fn(&PatternId) -> Option<&'a [f32]>,
    {
        let Some(cluster_id) = self.membership.remove(id) else {
            return false;
        };
        let Some(pos) = self.clusters.iter().position(|c| c.id == cluster_id) else {
            return false;
        };

        let cluster = &mut self.clusters[pos];
        cluster.members.remove(id);
        if cluster.members.is_empty() {
            self.clusters.remove(pos);
            return true;
        }

        let embeddings: Vec<&[f32]> = cluster.members.iter().filter_map(|m| lookup(m)).collect();
        if let Some(centroid) = mean(&embeddings) {
            cluster.centroid = centroid;
        }
        true
    }

    /// Full k-means pass over every pattern.
    pub fn rebuild(&mut self, patterns: &[(PatternId, &[f32])]) {
        self.clear();
        if patterns.is_empty() {
            return;
        }

        let k = self
            .num_clusters
            .min(patterns.len().div_ceil(PATTERNS_PER_CLUSTER))
            .max(1);
        let mut centroids = self.kmeans_pp_init(patterns, k);
        let mut assignments = vec![0usize; patterns.len()];

        for _ in 0..self.iterations.max(1) {
            for (slot, (_, embedding)) in assignments.iter_mut().zip(patterns.iter()) {
                *slot = nearest(&centroids, embedding);
            }

            for (c, centroid) in centroids.iter_mut().enumerate() {
                let members: Vec<&[f32]> = patterns
                    .iter()
                    .zip(assignments.iter())
                    .filter(|(_, &a)| a == c)
                    .map(|((_, e), _)| *e)
                    .collect();
                // Empty clusters keep their previous centroid this round.
                if let Some(updated) = mean(&members) {
                    *centroid = updated;
                }
            }
        }

        for (c, centroid) in centroids.into_iter().enumerate() {
            let members: BTreeSet<PatternId> = patterns
                .iter()
                .zip(assignments.iter())
                .filter(|(_, &a)| a == c)
                .map(|((id, _), _)| *id)
                .collect();
            if members.is_empty() {
                continue;
            }
            let id = self.next_cluster_id();
            for member in &members {
                self.membership.insert(*member, id);
            }
            self.clusters.push(Cluster {
                id,
                centroid,
                members,
            });
        }
    }

    /// The `n` clusters whose centroids are most similar to `query`, best first.
    pub fn nearest_clusters(&self, query: &[f32], n: usize) -> Vec<(&Cluster, f32)> {
        let mut scored: Vec<(&Cluster, f32)> = self
            .clusters
            .iter()
            .map(|c| (c, cosine_similarity(&c.centroid, query)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(n);
        scored
    }

    /// Member ids of the `n` nearest clusters.
    pub fn candidates(&self, query: &[f32], n: usize) -> Vec<PatternId> {
        self.nearest_clusters(query, n)
            .into_iter()
            .flat_map(|(c, _)| c.members.iter().copied())
            .collect()
    }

    fn seed_cluster(&mut self, id: PatternId, embedding: &[f32]) -> ClusterId {
        let cluster_id = self.next_cluster_id();
        self.clusters.push(Cluster {
            id: cluster_id,
            centroid: embedding.to_vec(),
            members: BTreeSet::from([id]),
        });
        self.membership.insert(id, cluster_id);
        cluster_id
    }

    fn next_cluster_id(&mut self) -> ClusterId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// k-means++ seeding with cosine distance and D^2 weighting.
    fn kmeans_pp_init(&mut self, patterns: &[(PatternId, &[f32])], k: usize) -> Vec<Vec<f32>> {
        let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);
        let first = self.rng.gen_range(0..patterns.len());
        centroids.push(patterns[first].1.to_vec());

        while centroids.len() < k {
            let distances: Vec<f32> = patterns
                .iter()
                .map(|(_, e)| {
                    let best = centroids
                        .iter()
                        .map(|c| cosine_similarity(c, e))
                        .fold(f32::NEG_INFINITY, f32::max);
                    let d = (1.0 - best).max(0.0);
                    d * d
                })
                .collect();
            let total: f32 = distances.iter().sum();

            if total <= f32::EPSILON {
                // Every remaining point coincides with a centroid.
                break;
            }

            let mut threshold = self.rng.gen::<f32>() * total;
            let mut chosen = patterns.len() - 1;
            for (idx, d) in distances.iter().enumerate() {
                threshold -= d;
                if threshold <= 0.0 {
                    chosen = idx;
                    break;
                }
            }
            centroids.push(patterns[chosen].1.to_vec());
        }

        centroids
    }
}

fn nearest(centroids: &[Vec<f32>], point: &[f32]) -> usize {
    centroids
        .iter()
        .enumerate()
        .map(|(i, c)| (i, cosine_similarity(c, point)))
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0)
}
