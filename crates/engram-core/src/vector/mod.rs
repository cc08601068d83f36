//! Vector store - optional semantic side index
//!
//! Maps content hashes to fixed-dimension embeddings and answers cosine
//! kNN and cluster queries. The embedding function is pluggable; the
//! default is a deterministic trigram-hashing embedder, so the store works
//! without any model runtime.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::storage::{Persistence, PersistenceError};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Vector store error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum VectorError {
    /// Referenced embedding id is absent
    #[error("Embedding not found: {0}")]
    NotFound(String),
    /// Vector length does not match the configured dimension
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Configured dimension
        expected: usize,
        /// Offending vector length
        actual: usize,
    },
    /// Underlying storage failure
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Vector store result type
pub type Result<T> = std::result::Result<T, VectorError>;

// ============================================================================
// EMBEDDING TYPES
// ============================================================================

/// A stored embedding with access bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorEmbedding {
    /// Unique identifier
    pub id: String,
    /// Content hash this embedding is addressed by
    pub content_hash: String,
    /// Embedding vector (fixed dimension per installation)
    pub vector: Vec<f32>,
    /// Caller-supplied metadata
    pub metadata: Value,
    /// When the embedding was created
    pub created_at: DateTime<Utc>,
    /// How often the embedding matched a query
    pub access_count: u64,
    /// When the embedding last matched a query
    pub last_accessed: DateTime<Utc>,
}

/// A kNN match
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityMatch {
    /// The matched embedding
    pub embedding: VectorEmbedding,
    /// Cosine similarity to the query (0.0 to 1.0)
    pub similarity: f32,
}

/// Clustering strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterMethod {
    /// Fixed cluster count, deterministic strided seeding
    KMeans,
    /// Agglomerative average-link merging above a similarity threshold
    Hierarchical,
}

/// Vector store statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorStoreStats {
    /// Stored embeddings
    pub total_embeddings: usize,
    /// Configured vector dimension
    pub vector_dimension: usize,
    /// Mean access count
    pub average_access_count: f64,
    /// Configured similarity floor
    pub similarity_threshold: f64,
}

// ============================================================================
// EMBEDDER
// ============================================================================

/// Pluggable embedding function
pub trait Embedder: Send + Sync {
    /// Output dimension
    fn dimension(&self) -> usize;
    /// Embed a content string into a vector of `dimension()` floats
    fn embed(&self, content: &str) -> Vec<f32>;
}

/// Deterministic trigram-hashing embedder
///
/// Hashes character trigrams into buckets and L2-normalizes the result.
/// Not semantically meaningful like a model embedding, but deterministic,
/// dependency-free, and stable across runs, which is what the default
/// installation needs.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    /// Create an embedder with the given output dimension
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, content: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimension];
        let chars: Vec<char> = content.to_lowercase().chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3.min(chars.len()).max(1)) {
            let mut hasher = DefaultHasher::new();
            window.hash(&mut hasher);
            let bucket = (hasher.finish() % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

/// Euclidean distance between two vectors of equal length
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::MAX;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Cosine similarity between two vectors of equal length
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot_product = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot_product += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = (norm_a * norm_b).sqrt();
    if denominator > 0.0 {
        dot_product / denominator
    } else {
        0.0
    }
}

/// Stable content hash used for embedding addressing
pub fn content_hash(content: &str) -> String {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

// ============================================================================
// VECTOR STORE
// ============================================================================

struct VectorInner {
    embeddings: HashMap<String, VectorEmbedding>,
    by_hash: HashMap<String, String>,
}

/// Content-addressed embedding store with cosine kNN and clustering
pub struct VectorStore {
    persistence: Arc<Persistence>,
    embedder: Box<dyn Embedder>,
    similarity_threshold: f64,
    inner: Mutex<VectorInner>,
}

impl VectorStore {
    /// Create a store with the given embedder
    pub fn new(
        persistence: Arc<Persistence>,
        embedder: Box<dyn Embedder>,
        similarity_threshold: f64,
    ) -> Self {
        Self {
            persistence,
            embedder,
            similarity_threshold,
            inner: Mutex::new(VectorInner {
                embeddings: HashMap::new(),
                by_hash: HashMap::new(),
            }),
        }
    }

    /// Create a store with the default hashing embedder
    pub fn with_default_embedder(
        persistence: Arc<Persistence>,
        dimension: usize,
        similarity_threshold: f64,
    ) -> Self {
        Self::new(
            persistence,
            Box::new(HashEmbedder::new(dimension)),
            similarity_threshold,
        )
    }

    fn lock(&self) -> MutexGuard<'_, VectorInner> {
        match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Load persisted embeddings into the cache
    pub fn load(&self) -> Result<usize> {
        let persisted = self.persistence.load_all_embeddings()?;
        let mut inner = self.lock();

        inner.embeddings.clear();
        inner.by_hash.clear();
        for embedding in persisted {
            inner
                .by_hash
                .insert(embedding.content_hash.clone(), embedding.id.clone());
            inner.embeddings.insert(embedding.id.clone(), embedding);
        }

        let loaded = inner.embeddings.len();
        info!("Vector store loaded {loaded} embeddings");
        Ok(loaded)
    }

    /// Embed and store content, returning the embedding
    ///
    /// Content that hashes to an existing embedding is deduplicated: the
    /// existing embedding is touched and returned.
    pub fn store_embedding(&self, content: &str, metadata: Value) -> Result<VectorEmbedding> {
        let hash = content_hash(content);

        {
            let mut inner = self.lock();
            if let Some(existing_id) = inner.by_hash.get(&hash).cloned() {
                if let Some(existing) = inner.embeddings.get_mut(&existing_id) {
                    existing.access_count += 1;
                    existing.last_accessed = Utc::now();
                    let snapshot = existing.clone();
                    self.persistence.store_embedding(&snapshot)?;
                    return Ok(snapshot);
                }
            }
        }

        let vector = self.embedder.embed(content);
        if vector.len() != self.embedder.dimension() {
            return Err(VectorError::DimensionMismatch {
                expected: self.embedder.dimension(),
                actual: vector.len(),
            });
        }

        let now = Utc::now();
        let embedding = VectorEmbedding {
            id: Uuid::new_v4().to_string(),
            content_hash: hash.clone(),
            vector,
            metadata,
            created_at: now,
            access_count: 0,
            last_accessed: now,
        };

        self.persistence.store_embedding(&embedding)?;
        let mut inner = self.lock();
        inner.by_hash.insert(hash, embedding.id.clone());
        inner.embeddings.insert(embedding.id.clone(), embedding.clone());

        debug!(
            "Stored embedding {} with {} dimensions",
            embedding.id,
            embedding.vector.len()
        );
        Ok(embedding)
    }

    /// Cosine kNN against a content string
    pub fn find_similar(
        &self,
        content: &str,
        limit: usize,
        min_similarity: Option<f64>,
    ) -> Result<Vec<SimilarityMatch>> {
        let query = self.embedder.embed(content);
        self.find_similar_to_vector(&query, limit, min_similarity, None)
    }

    /// Cosine kNN against a stored embedding, excluding itself
    pub fn find_similar_to(
        &self,
        embedding_id: &str,
        limit: usize,
        min_similarity: Option<f64>,
    ) -> Result<Vec<SimilarityMatch>> {
        let query = {
            let inner = self.lock();
            inner
                .embeddings
                .get(embedding_id)
                .map(|embedding| embedding.vector.clone())
                .ok_or_else(|| VectorError::NotFound(embedding_id.to_string()))?
        };
        self.find_similar_to_vector(&query, limit, min_similarity, Some(embedding_id))
    }

    fn find_similar_to_vector(
        &self,
        query: &[f32],
        limit: usize,
        min_similarity: Option<f64>,
        exclude_id: Option<&str>,
    ) -> Result<Vec<SimilarityMatch>> {
        let threshold = min_similarity.unwrap_or(self.similarity_threshold) as f32;

        let mut matches: Vec<(String, f32)> = {
            let inner = self.lock();
            inner
                .embeddings
                .values()
                .filter(|embedding| exclude_id != Some(embedding.id.as_str()))
                .map(|embedding| {
                    (
                        embedding.id.clone(),
                        cosine_similarity(query, &embedding.vector),
                    )
                })
                .filter(|(_, similarity)| *similarity >= threshold)
                .collect()
        };

        matches.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        matches.truncate(limit);

        // touch matched embeddings inside one critical section
        let mut inner = self.lock();
        let mut result = Vec::with_capacity(matches.len());
        for (id, similarity) in matches {
            let Some(embedding) = inner.embeddings.get_mut(&id) else {
                continue;
            };
            embedding.access_count += 1;
            embedding.last_accessed = Utc::now();
            let snapshot = embedding.clone();
            self.persistence.store_embedding(&snapshot)?;
            result.push(SimilarityMatch {
                embedding: snapshot,
                similarity,
            });
        }
        Ok(result)
    }

    /// Fetch an embedding by id
    pub fn get(&self, embedding_id: &str) -> Result<VectorEmbedding> {
        let inner = self.lock();
        inner
            .embeddings
            .get(embedding_id)
            .cloned()
            .ok_or_else(|| VectorError::NotFound(embedding_id.to_string()))
    }

    /// Delete an embedding
    pub fn delete(&self, embedding_id: &str) -> Result<()> {
        let mut inner = self.lock();
        let embedding = inner
            .embeddings
            .remove(embedding_id)
            .ok_or_else(|| VectorError::NotFound(embedding_id.to_string()))?;
        inner.by_hash.remove(&embedding.content_hash);
        self.persistence.delete_embedding(embedding_id)?;
        Ok(())
    }

    /// Cluster stored embeddings
    ///
    /// Returns a map from cluster label to member embedding ids.
    pub fn cluster(
        &self,
        method: ClusterMethod,
        n_clusters: usize,
        threshold: f64,
    ) -> Result<HashMap<String, Vec<String>>> {
        let members: Vec<(String, Vec<f32>)> = {
            let inner = self.lock();
            let mut members: Vec<(String, Vec<f32>)> = inner
                .embeddings
                .values()
                .map(|embedding| (embedding.id.clone(), embedding.vector.clone()))
                .collect();
            // deterministic input order regardless of hash-map iteration
            members.sort_by(|a, b| a.0.cmp(&b.0));
            members
        };

        Ok(match method {
            ClusterMethod::KMeans => kmeans_clusters(&members, n_clusters),
            ClusterMethod::Hierarchical => hierarchical_clusters(&members, threshold as f32),
        })
    }

    /// Vector store statistics
    pub fn statistics(&self) -> VectorStoreStats {
        let inner = self.lock();
        let total = inner.embeddings.len();
        let access_sum: u64 = inner
            .embeddings
            .values()
            .map(|embedding| embedding.access_count)
            .sum();

        VectorStoreStats {
            total_embeddings: total,
            vector_dimension: self.embedder.dimension(),
            average_access_count: if total > 0 {
                access_sum as f64 / total as f64
            } else {
                0.0
            },
            similarity_threshold: self.similarity_threshold,
        }
    }
}

// ============================================================================
// CLUSTERING
// ============================================================================

fn kmeans_clusters(
    members: &[(String, Vec<f32>)],
    n_clusters: usize,
) -> HashMap<String, Vec<String>> {
    let k = n_clusters.max(1);
    if members.len() <= k {
        return members
            .iter()
            .enumerate()
            .map(|(index, (id, _))| (index.to_string(), vec![id.clone()]))
            .collect();
    }

    let dimension = members[0].1.len();

    // strided seeding keeps the result deterministic
    let mut centroids: Vec<Vec<f32>> = (0..k)
        .map(|cluster| members[cluster * members.len() / k].1.clone())
        .collect();

    let mut assignments = vec![0usize; members.len()];
    for _ in 0..10 {
        let mut changed = false;
        for (index, (_, vector)) in members.iter().enumerate() {
            let best = (0..k)
                .min_by(|a, b| {
                    euclidean_distance(vector, &centroids[*a])
                        .total_cmp(&euclidean_distance(vector, &centroids[*b]))
                })
                .unwrap_or(0);
            if assignments[index] != best {
                assignments[index] = best;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        for (cluster, centroid) in centroids.iter_mut().enumerate() {
            let mut sum = vec![0.0_f32; dimension];
            let mut count = 0usize;
            for (index, (_, vector)) in members.iter().enumerate() {
                if assignments[index] == cluster {
                    for (accumulator, component) in sum.iter_mut().zip(vector.iter()) {
                        *accumulator += component;
                    }
                    count += 1;
                }
            }
            if count > 0 {
                for component in &mut sum {
                    *component /= count as f32;
                }
                *centroid = sum;
            }
        }
    }

    let mut clusters: HashMap<String, Vec<String>> = HashMap::new();
    for (index, (id, _)) in members.iter().enumerate() {
        clusters
            .entry(assignments[index].to_string())
            .or_default()
            .push(id.clone());
    }
    clusters
}

fn hierarchical_clusters(
    members: &[(String, Vec<f32>)],
    threshold: f32,
) -> HashMap<String, Vec<String>> {
    let mut clusters: Vec<Vec<usize>> = (0..members.len()).map(|index| vec![index]).collect();

    // average-link agglomerative merging: the merge score between two
    // clusters is the mean over all cross-cluster member pairs
    loop {
        let mut best: Option<(usize, usize, f32)> = None;
        for i in 0..clusters.len() {
            for j in (i + 1)..clusters.len() {
                let mut similarity_sum = 0.0_f32;
                let mut pairs = 0usize;
                for &a in &clusters[i] {
                    for &b in &clusters[j] {
                        similarity_sum += cosine_similarity(&members[a].1, &members[b].1);
                        pairs += 1;
                    }
                }
                let average_similarity = if pairs > 0 {
                    similarity_sum / pairs as f32
                } else {
                    f32::MIN
                };
                if average_similarity >= threshold
                    && best.is_none_or(|(_, _, current)| average_similarity > current)
                {
                    best = Some((i, j, average_similarity));
                }
            }
        }

        match best {
            Some((i, j, _)) => {
                let merged = clusters.remove(j);
                clusters[i].extend(merged);
            }
            None => break,
        }
    }

    clusters
        .into_iter()
        .enumerate()
        .map(|(label, indices)| {
            (
                label.to_string(),
                indices
                    .into_iter()
                    .map(|index| members[index].0.clone())
                    .collect(),
            )
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
