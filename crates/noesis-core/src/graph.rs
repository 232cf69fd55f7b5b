//! Knowledge Graph Reasoner: traversal and inference over the symbolic edges
//! in the Brain Store.
//!
//! Path finding treats edges as traversable in both directions (matching the
//! store's related-concepts union); transitive inference is strictly directed.

use crate::error::BrainResult;
use crate::shared::KnowledgeEdge;
use crate::store::BrainStore;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Default hop cap for path finding.
pub const DEFAULT_MAX_PATH_LENGTH: usize = 4;

/// Confidence damping applied to each two-hop inference.
const INFERENCE_DAMPING: f32 = 0.7;

/// Inferences below this confidence are dropped.
const INFERENCE_MIN_CONFIDENCE: f32 = 0.3;

/// Cap on returned inferences per concept.
const INFERENCE_CAP: usize = 10;

/// A concept chain discovered by breadth-first search.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConnectionPath {
    /// Concepts along the path, start to end inclusive.
    pub nodes: Vec<String>,
    /// Relationship type of each traversed edge (`nodes.len() - 1` entries).
    pub relationships: Vec<String>,
    /// Product of edge confidences along the path.
    pub confidence: f32,
}

/// A proposed (not yet stored) relationship derived by transitive inference.
#[derive(Debug, Clone, serde::Serialize)]
pub struct InferredRelationship {
    pub source_node: String,
    pub target_node: String,
    /// Always "related_to"; the chain is kept in `via` as evidence.
    pub relationship_type: String,
    pub confidence: f32,
    /// Human-readable chain: `A -r1-> B -r2-> C`.
    pub via: String,
}

/// Graph traversal and inference with a read-through per-concept cache.
/// The cache may be dropped at any time; the store stays the source of truth.
pub struct GraphReasoner {
    store: Arc<BrainStore>,
    concept_cache: DashMap<String, Vec<KnowledgeEdge>>,
}

impl GraphReasoner {
    pub fn new(store: Arc<BrainStore>) -> Self {
        Self {
            store,
            concept_cache: DashMap::new(),
        }
    }

    /// One-hop neighbor fetch, cached per concept.
    pub fn explore_concept(&self, concept: &str) -> BrainResult<Vec<KnowledgeEdge>> {
        if let Some(cached) = self.concept_cache.get(concept) {
            return Ok(cached.clone());
        }
        let edges = self.store.get_related_concepts(concept)?;
        self.concept_cache
            .insert(concept.to_string(), edges.clone());
        Ok(edges)
    }

    /// Drops the concept cache. Called after bulk edge writes; reads simply
    /// repopulate it from the store.
    pub fn clear_cache(&self) {
        self.concept_cache.clear();
    }

    /// Breadth-first search for the hop-shortest chain of at most `max_length`
    /// edges between two concepts. Path confidence is the product of the edge
    /// confidences. Returns `None` when no such chain exists.
    pub fn find_connection_path(
        &self,
        start: &str,
        end: &str,
        max_length: usize,
    ) -> BrainResult<Option<ConnectionPath>> {
        if start == end {
            return Ok(Some(ConnectionPath {
                nodes: vec![start.to_string()],
                relationships: Vec::new(),
                confidence: 1.0,
            }));
        }

        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(start.to_string());
        let mut queue: VecDeque<ConnectionPath> = VecDeque::new();
        queue.push_back(ConnectionPath {
            nodes: vec![start.to_string()],
            relationships: Vec::new(),
            confidence: 1.0,
        });

        while let Some(path) = queue.pop_front() {
            if path.relationships.len() >= max_length {
                continue;
            }
            let current = path.nodes.last().expect("path never empty").clone();
            for edge in self.explore_concept(&current)? {
                let Some(next) = edge.other_endpoint(&current) else {
                    continue;
                };
                if next == end {
                    let mut nodes = path.nodes.clone();
                    nodes.push(next.to_string());
                    let mut relationships = path.relationships.clone();
                    relationships.push(edge.relationship_type.clone());
                    return Ok(Some(ConnectionPath {
                        nodes,
                        relationships,
                        confidence: path.confidence * edge.confidence,
                    }));
                }
                if !visited.insert(next.to_string()) {
                    continue;
                }
                let mut nodes = path.nodes.clone();
                nodes.push(next.to_string());
                let mut relationships = path.relationships.clone();
                relationships.push(edge.relationship_type.clone());
                queue.push_back(ConnectionPath {
                    nodes,
                    relationships,
                    confidence: path.confidence * edge.confidence,
                });
            }
        }
        Ok(None)
    }

    /// Two-hop transitive inference over directed edges: for every
    /// `A -r1-> B -r2-> C`, propose `A related_to C` with confidence
    /// `conf(r1) × conf(r2) × 0.7`. Keeps inferences above 0.3, sorted
    /// descending, capped at 10. Proposals are returned, not written back.
    pub fn infer_new_relationships(&self, concept: &str) -> BrainResult<Vec<InferredRelationship>> {
        // Strongest chain per target; scan order must not shadow a better one.
        let mut best_by_target: HashMap<String, InferredRelationship> = HashMap::new();

        for first in self.store.get_outgoing_edges(concept)? {
            for second in self.store.get_outgoing_edges(&first.target_node)? {
                if second.target_node == concept {
                    continue;
                }
                let confidence = first.confidence * second.confidence * INFERENCE_DAMPING;
                if confidence <= INFERENCE_MIN_CONFIDENCE {
                    continue;
                }
                if best_by_target
                    .get(&second.target_node)
                    .map(|existing| existing.confidence >= confidence)
                    .unwrap_or(false)
                {
                    continue;
                }
                best_by_target.insert(
                    second.target_node.clone(),
                    InferredRelationship {
                        source_node: concept.to_string(),
                        target_node: second.target_node.clone(),
                        relationship_type: "related_to".to_string(),
                        confidence,
                        via: format!(
                            "{} -{}-> {} -{}-> {}",
                            concept,
                            first.relationship_type,
                            first.target_node,
                            second.relationship_type,
                            second.target_node
                        ),
                    },
                );
            }
        }

        let mut inferences: Vec<InferredRelationship> = best_by_target.into_values().collect();
        inferences.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        inferences.truncate(INFERENCE_CAP);
        Ok(inferences)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reasoner() -> (tempfile::TempDir, GraphReasoner) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(BrainStore::open_path(dir.path()).unwrap());
        (dir, GraphReasoner::new(store))
    }

    fn edge(store: &BrainStore, from: &str, to: &str, confidence: f32) {
        store
            .add_knowledge_edge(&KnowledgeEdge::new(from, to, "related_to", confidence))
            .unwrap();
    }

    #[test]
    fn finds_shortest_path_with_product_confidence() {
        let (_dir, reasoner) = reasoner();
        let store = reasoner.store.clone();
        edge(&store, "a", "b", 0.9);
        edge(&store, "b", "c", 0.8);
        // Longer detour that BFS must not prefer.
        edge(&store, "a", "x", 0.9);
        edge(&store, "x", "y", 0.9);
        edge(&store, "y", "c", 0.9);

        let path = reasoner.find_connection_path("a", "c", 4).unwrap().unwrap();
        assert_eq!(path.nodes, vec!["a", "b", "c"]);
        assert!((path.confidence - 0.72).abs() < 1e-5);
    }

    #[test]
    fn path_traverses_reverse_edges() {
        let (_dir, reasoner) = reasoner();
        edge(&reasoner.store, "b", "a", 0.9);
        edge(&reasoner.store, "b", "c", 0.9);

        let path = reasoner.find_connection_path("a", "c", 4).unwrap().unwrap();
        assert_eq!(path.nodes, vec!["a", "b", "c"]);
    }

    #[test]
    fn disconnected_component_returns_none() {
        let (_dir, reasoner) = reasoner();
        let store = reasoner.store.clone();
        edge(&store, "a", "b", 0.9);
        edge(&store, "b", "c", 0.9);
        // Island disconnected from the a-b-c chain.
        edge(&store, "island1", "island2", 0.9);

        assert!(reasoner
            .find_connection_path("a", "island2", 4)
            .unwrap()
            .is_none());
    }

    #[test]
    fn max_length_bounds_the_search() {
        let (_dir, reasoner) = reasoner();
        let store = reasoner.store.clone();
        edge(&store, "n0", "n1", 0.9);
        edge(&store, "n1", "n2", 0.9);
        edge(&store, "n2", "n3", 0.9);

        assert!(reasoner.find_connection_path("n0", "n3", 2).unwrap().is_none());
        assert!(reasoner.find_connection_path("n0", "n3", 3).unwrap().is_some());
    }

    #[test]
    fn transitive_inference_damps_and_filters() {
        let (_dir, reasoner) = reasoner();
        let store = reasoner.store.clone();
        edge(&store, "rust", "memory_safety", 0.9);
        edge(&store, "memory_safety", "reliability", 0.9);
        // Weak chain that falls below the 0.3 floor after damping.
        edge(&store, "rust", "syntax", 0.4);
        edge(&store, "syntax", "parsers", 0.4);

        let inferred = reasoner.infer_new_relationships("rust").unwrap();
        assert_eq!(inferred.len(), 1);
        assert_eq!(inferred[0].target_node, "reliability");
        assert!((inferred[0].confidence - 0.9 * 0.9 * 0.7).abs() < 1e-5);
    }

    #[test]
    fn inference_keeps_the_strongest_chain_per_target() {
        let (_dir, reasoner) = reasoner();
        let store = reasoner.store.clone();
        // Two chains from "deploys" to "incidents" with different strengths.
        edge(&store, "deploys", "regressions", 0.9);
        edge(&store, "regressions", "incidents", 0.9);
        edge(&store, "deploys", "load", 0.8);
        edge(&store, "load", "incidents", 0.8);

        let inferred = reasoner.infer_new_relationships("deploys").unwrap();
        let to_incidents: Vec<_> = inferred
            .iter()
            .filter(|i| i.target_node == "incidents")
            .collect();
        assert_eq!(to_incidents.len(), 1);
        assert!((to_incidents[0].confidence - 0.9 * 0.9 * 0.7).abs() < 1e-5);
        assert!(to_incidents[0].via.contains("regressions"));
    }

    #[test]
    fn inference_excludes_self_loops() {
        let (_dir, reasoner) = reasoner();
        let store = reasoner.store.clone();
        edge(&store, "a", "b", 0.9);
        edge(&store, "b", "a", 0.9);

        let inferred = reasoner.infer_new_relationships("a").unwrap();
        assert!(inferred.iter().all(|i| i.target_node != "a"));
    }

    #[test]
    fn explore_concept_serves_from_cache() {
        let (_dir, reasoner) = reasoner();
        edge(&reasoner.store, "a", "b", 0.9);
        let first = reasoner.explore_concept("a").unwrap();
        assert_eq!(first.len(), 1);

        // New edge is invisible until the cache is dropped.
        edge(&reasoner.store, "a", "c", 0.9);
        assert_eq!(reasoner.explore_concept("a").unwrap().len(), 1);
        reasoner.clear_cache();
        assert_eq!(reasoner.explore_concept("a").unwrap().len(), 2);
    }
}
