//! Memory Manager: semantic storage, similarity search, associative
//! retrieval, and consolidation over the Brain Store.
//!
//! Holds no independent copy of truth. Every write goes through the store's
//! typed operations; everything kept in-process is a read-through convenience
//! that tolerates being dropped.

use crate::embedding::{cosine_similarity, fnv1a64, Embedder};
use crate::error::BrainResult;
use crate::shared::{now_epoch_ms, KnowledgeEdge, MemoryRecord};
use crate::store::BrainStore;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;

/// Pairwise similarity above which two memories belong to the same cluster.
const CONSOLIDATION_SIMILARITY: f32 = 0.8;

/// A cluster must have at least this many members to be consolidated.
const MIN_CLUSTER_SIZE: usize = 3;

/// How many member contents are quoted in a consolidated summary.
const SUMMARY_MEMBER_CAP: usize = 3;

/// How many recent memories a consolidation pass considers.
const CONSOLIDATION_SCAN_CAP: usize = 50;

/// Candidate pool scanned by associative retrieval.
const ASSOCIATIVE_SCAN_CAP: usize = 50;

/// Keywords extracted per memory for co-occurrence edges.
const KEYWORDS_PER_MEMORY: usize = 8;

/// Confidence assigned to extracted co-occurrence edges.
const CO_OCCURRENCE_CONFIDENCE: f32 = 0.7;

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-zA-Z][a-zA-Z0-9_]{3,}").expect("static regex"));

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "this", "that", "with", "from", "have", "been", "were", "will", "would", "could",
        "should", "about", "after", "before", "their", "there", "which", "while", "where",
        "when", "what", "then", "than", "them", "they", "some", "such", "into", "over",
        "under", "only", "also", "very", "more", "most", "other", "each", "because",
        "between", "through", "during", "against", "being", "does", "doing", "done",
    ]
    .into_iter()
    .collect()
});

/// A search hit: the stored record plus its similarity to the query.
#[derive(Debug, Clone)]
pub struct MemoryMatch {
    pub record: MemoryRecord,
    pub similarity: f32,
}

/// Outcome of one consolidation pass.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ConsolidationReport {
    /// Clusters that met the size threshold and were merged.
    pub clusters_consolidated: usize,
    /// Total member memories folded into consolidated summaries.
    pub memories_consolidated: usize,
}

/// Embedding-based semantic memory over the Brain Store.
pub struct MemoryManager {
    store: Arc<BrainStore>,
    embedder: Arc<dyn Embedder>,
}

impl MemoryManager {
    pub fn new(store: Arc<BrainStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    /// Access to the underlying store (single source of truth).
    pub fn store(&self) -> &Arc<BrainStore> {
        &self.store
    }

    /// Embeds and persists a memory, then extracts co-occurring keyword pairs
    /// into `co_occurs_with` knowledge edges. Returns the content-derived
    /// memory id.
    pub fn store_memory(
        &self,
        content: &str,
        memory_type: &str,
        source_type: &str,
        confidence: f32,
    ) -> BrainResult<String> {
        let now = now_epoch_ms();
        let memory_id = format!("mem_{:016x}_{}", fnv1a64(content.as_bytes()), now);
        let record = MemoryRecord {
            memory_id: memory_id.clone(),
            content: content.to_string(),
            embedding: self.embedder.embed(content),
            memory_type: memory_type.to_string(),
            source_type: source_type.to_string(),
            confidence_score: confidence.clamp(0.0, 1.0),
            created_at: now,
            last_accessed: now,
            access_count: 0,
        };
        self.store.store_memory(&record)?;

        let keywords = extract_keywords(content);
        for i in 0..keywords.len() {
            for j in (i + 1)..keywords.len() {
                let edge = KnowledgeEdge::new(
                    keywords[i].clone(),
                    keywords[j].clone(),
                    "co_occurs_with",
                    CO_OCCURRENCE_CONFIDENCE,
                )
                .with_evidence(memory_id.clone());
                self.store.add_knowledge_edge(&edge)?;
            }
        }

        tracing::debug!(
            target: "noesis::memory",
            memory_id = %memory_id,
            memory_type = memory_type,
            keywords = keywords.len(),
            "memory stored"
        );
        Ok(memory_id)
    }

    /// Semantic search: embeds the query, scores a prefetch of `2×limit`
    /// candidates by cosine similarity, keeps hits at or above `threshold`,
    /// and bumps access metadata for every returned memory.
    pub fn search_memories(
        &self,
        query: &str,
        memory_type: Option<&str>,
        limit: usize,
        threshold: f32,
    ) -> BrainResult<Vec<MemoryMatch>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let query_embedding = self.embedder.embed(query);
        let candidates = self.store.search_memories(memory_type, limit * 2)?;

        let mut matches: Vec<MemoryMatch> = candidates
            .into_iter()
            .map(|record| {
                let similarity = cosine_similarity(&query_embedding, &record.embedding);
                MemoryMatch { record, similarity }
            })
            .filter(|m| m.similarity >= threshold)
            .collect();
        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(limit);

        for m in &matches {
            self.store.touch_memory(&m.record.memory_id)?;
        }
        Ok(matches)
    }

    /// Associative retrieval: keywords of the seed memory, one hop through the
    /// knowledge graph, then memories mentioning the related concepts. The
    /// seed itself is excluded.
    pub fn get_associative_memories(
        &self,
        seed_id: &str,
        max: usize,
    ) -> BrainResult<Vec<MemoryRecord>> {
        let Some(seed) = self.store.get_memory(seed_id)? else {
            return Ok(Vec::new());
        };
        let keywords = extract_keywords(&seed.content);

        let mut concepts: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = keywords.iter().cloned().collect();
        for keyword in &keywords {
            for edge in self.store.get_related_concepts(keyword)? {
                if let Some(other) = edge.other_endpoint(keyword) {
                    if seen.insert(other.to_string()) {
                        concepts.push(other.to_string());
                    }
                }
            }
        }
        if concepts.is_empty() {
            return Ok(Vec::new());
        }

        let candidates = self.store.search_memories(None, ASSOCIATIVE_SCAN_CAP)?;
        let mut out = Vec::new();
        for record in candidates {
            if record.memory_id == seed_id {
                continue;
            }
            let content_lower = record.content.to_lowercase();
            if concepts.iter().any(|c| content_lower.contains(c.as_str())) {
                out.push(record);
                if out.len() >= max {
                    break;
                }
            }
        }
        Ok(out)
    }

    /// Clusters recent memories by pairwise cosine similarity and merges
    /// clusters of size ≥ 3 into one `consolidated` summary memory each.
    /// Memories without a usable embedding are skipped, not an error.
    pub fn consolidate_memories(&self, session_id: &str) -> BrainResult<ConsolidationReport> {
        let dims = self.embedder.dimensions();
        let recent: Vec<MemoryRecord> = self
            .store
            .search_memories(None, CONSOLIDATION_SCAN_CAP)?
            .into_iter()
            .filter(|m| m.memory_type != "consolidated")
            .filter(|m| m.embedding.len() == dims && m.embedding.iter().any(|v| *v != 0.0))
            .collect();

        let mut report = ConsolidationReport::default();
        let mut clustered = vec![false; recent.len()];

        for i in 0..recent.len() {
            if clustered[i] {
                continue;
            }
            let mut cluster = vec![i];
            for j in (i + 1)..recent.len() {
                if clustered[j] {
                    continue;
                }
                let sim = cosine_similarity(&recent[i].embedding, &recent[j].embedding);
                if sim > CONSOLIDATION_SIMILARITY {
                    cluster.push(j);
                }
            }
            if cluster.len() < MIN_CLUSTER_SIZE {
                continue;
            }
            for &idx in &cluster {
                clustered[idx] = true;
            }

            let quoted: Vec<&str> = cluster
                .iter()
                .take(SUMMARY_MEMBER_CAP)
                .map(|&idx| recent[idx].content.as_str())
                .collect();
            let rest = cluster.len().saturating_sub(SUMMARY_MEMBER_CAP);
            let mut summary = format!(
                "Consolidated {} similar memories: {}",
                cluster.len(),
                quoted.join(" | ")
            );
            if rest > 0 {
                summary.push_str(&format!(" (+{rest} more)"));
            }
            let mean_confidence = cluster
                .iter()
                .map(|&idx| recent[idx].confidence_score)
                .sum::<f32>()
                / cluster.len() as f32;

            self.store_memory(&summary, "consolidated", "consolidation", mean_confidence)?;
            report.clusters_consolidated += 1;
            report.memories_consolidated += cluster.len();
        }

        if report.clusters_consolidated > 0 {
            tracing::info!(
                target: "noesis::memory",
                session = session_id,
                clusters = report.clusters_consolidated,
                members = report.memories_consolidated,
                "memory consolidation pass complete"
            );
        }
        Ok(report)
    }
}

/// Keyword extraction for co-occurrence edges: word tokens of 4+ characters,
/// stopword-filtered, deduplicated in order, capped.
pub(crate) fn extract_keywords(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for m in WORD_RE.find_iter(content) {
        let word = m.as_str().to_lowercase();
        if STOPWORDS.contains(word.as_str()) {
            continue;
        }
        if seen.insert(word.clone()) {
            out.push(word);
            if out.len() >= KEYWORDS_PER_MEMORY {
                break;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;

    fn manager() -> (tempfile::TempDir, MemoryManager) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(BrainStore::open_path(dir.path()).unwrap());
        (dir, MemoryManager::new(store, Arc::new(HashEmbedder::new())))
    }

    #[test]
    fn keywords_skip_stopwords_and_short_words() {
        let kws = extract_keywords("This is about rust memory consolidation with sled");
        assert!(kws.contains(&"rust".to_string()));
        assert!(kws.contains(&"consolidation".to_string()));
        assert!(!kws.contains(&"this".to_string()));
        assert!(!kws.contains(&"is".to_string()));
    }

    #[test]
    fn exact_content_search_ranks_self_first_with_similarity_one() {
        let (_dir, mm) = manager();
        let id = mm
            .store_memory("deploy pipeline failed on integration stage", "experience", "test", 0.9)
            .unwrap();
        mm.store_memory("giraffes eat acacia leaves at dawn", "experience", "test", 0.9)
            .unwrap();

        let hits = mm
            .search_memories("deploy pipeline failed on integration stage", None, 5, 0.7)
            .unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].record.memory_id, id);
        assert!((hits[0].similarity - 1.0).abs() < 1e-5);
    }

    #[test]
    fn search_bumps_access_metadata() {
        let (_dir, mm) = manager();
        let id = mm
            .store_memory("observability matters for cognitive loops", "experience", "test", 0.8)
            .unwrap();
        mm.search_memories("observability matters for cognitive loops", None, 3, 0.7)
            .unwrap();
        let record = mm.store().get_memory(&id).unwrap().unwrap();
        assert_eq!(record.access_count, 1);
    }

    #[test]
    fn co_occurrence_edges_written() {
        let (_dir, mm) = manager();
        mm.store_memory("kubernetes cluster autoscaler misbehaved", "experience", "test", 0.8)
            .unwrap();
        let related = mm.store().get_related_concepts("kubernetes").unwrap();
        assert!(!related.is_empty());
        assert!(related.iter().all(|e| e.relationship_type == "co_occurs_with"));
        assert!(related.iter().all(|e| (e.confidence - 0.7).abs() < 1e-6));
    }

    #[test]
    fn associative_retrieval_excludes_seed() {
        let (_dir, mm) = manager();
        let seed = mm
            .store_memory("postgres replication lag spiked", "experience", "test", 0.8)
            .unwrap();
        mm.store_memory("replication monitoring dashboards were stale", "experience", "test", 0.8)
            .unwrap();

        let associated = mm.get_associative_memories(&seed, 5).unwrap();
        assert!(associated.iter().all(|m| m.memory_id != seed));
    }

    #[test]
    fn two_member_cluster_is_never_consolidated() {
        let (_dir, mm) = manager();
        mm.store_memory("api latency regression in checkout", "experience", "test", 0.8)
            .unwrap();
        mm.store_memory("api latency regression in checkout", "pattern", "test", 0.8)
            .unwrap();

        let report = mm.consolidate_memories("session-1").unwrap();
        assert_eq!(report.clusters_consolidated, 0);
        let stats = mm.store().get_stats().unwrap();
        assert_eq!(stats.memories_by_type.get("consolidated"), None);
    }

    #[test]
    fn three_member_cluster_consolidates_into_one_memory() {
        let (_dir, mm) = manager();
        // Identical content hashes to the same id, so vary the type to keep
        // three distinct rows with identical embeddings.
        mm.store_memory("disk pressure alert on node seven", "experience", "a", 0.9)
            .unwrap();
        mm.store_memory("disk pressure alert on node seven!", "experience", "b", 0.8)
            .unwrap();
        mm.store_memory("Disk pressure alert on node seven?", "pattern", "c", 0.7)
            .unwrap();
        mm.store_memory("completely unrelated gardening notes", "experience", "d", 0.9)
            .unwrap();

        let report = mm.consolidate_memories("session-1").unwrap();
        assert_eq!(report.clusters_consolidated, 1);
        assert_eq!(report.memories_consolidated, 3);

        let stats = mm.store().get_stats().unwrap();
        assert_eq!(stats.memories_by_type.get("consolidated"), Some(&1));
    }

    #[test]
    fn consolidation_skips_unusable_embeddings() {
        let (_dir, mm) = manager();
        // A record with a zero embedding (e.g. written by an older embedder)
        // must be skipped, not treated as an error.
        let broken = MemoryRecord {
            memory_id: "mem_broken".to_string(),
            content: "legacy record".to_string(),
            embedding: vec![0.0; 128],
            memory_type: "experience".to_string(),
            source_type: "legacy".to_string(),
            confidence_score: 0.5,
            created_at: 1,
            last_accessed: 1,
            access_count: 0,
        };
        mm.store().store_memory(&broken).unwrap();
        let report = mm.consolidate_memories("session-1").unwrap();
        assert_eq!(report.clusters_consolidated, 0);
    }
}
