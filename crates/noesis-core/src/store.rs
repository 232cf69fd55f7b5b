//! Sled-backed Brain Store: one tree per table, typed operations only.
//!
//! | Tree               | Record              | Key                              |
//! |--------------------|---------------------|----------------------------------|
//! | working_memory     | WorkingMemoryState  | session_id                       |
//! | task_queue         | TaskRecord          | task_id                          |
//! | thought_log        | ThoughtRecord       | `{timestamp_ms:020}/{thought_id}`|
//! | knowledge_store    | MemoryRecord        | memory_id                        |
//! | knowledge_graph    | KnowledgeEdge       | edge_id                          |
//! | agent_performance  | AgentPerformance    | `{agent_type}/{task_type}`       |
//!
//! Tree creation is idempotent and happens on open, so calling `open_path` on
//! every startup is safe. Sled provides single-writer/multi-reader concurrency
//! and atomic per-key commits; all mutation goes through these typed
//! operations and storage I/O errors always propagate to the caller.

use crate::error::{BrainError, BrainResult};
use crate::shared::{
    now_epoch_ms, AgentPerformance, KnowledgeEdge, MemoryRecord, TaskRecord, TaskStatus,
    ThoughtRecord, WorkingMemoryState,
};
use sled::{Db, Tree};
use std::collections::HashMap;
use std::path::Path;

const TREE_WORKING_MEMORY: &str = "working_memory";
const TREE_TASK_QUEUE: &str = "task_queue";
const TREE_THOUGHT_LOG: &str = "thought_log";
const TREE_KNOWLEDGE_STORE: &str = "knowledge_store";
const TREE_KNOWLEDGE_GRAPH: &str = "knowledge_graph";
const TREE_AGENT_PERFORMANCE: &str = "agent_performance";

/// Cap applied to `get_related_concepts` results.
const RELATED_CONCEPTS_CAP: usize = 20;

/// Row counts and histograms over the whole store.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct BrainStats {
    pub working_memory_rows: usize,
    pub tasks_total: usize,
    pub tasks_by_status: HashMap<String, usize>,
    pub thoughts_total: usize,
    pub memories_total: usize,
    pub memories_by_type: HashMap<String, usize>,
    pub knowledge_edges_total: usize,
    pub performance_rows: usize,
}

/// The persistent, transactional storage layer for all agent state.
/// Exclusively owns persisted rows; every cache above it is read-through.
pub struct BrainStore {
    db: Db,
    working_memory: Tree,
    task_queue: Tree,
    thought_log: Tree,
    knowledge_store: Tree,
    knowledge_graph: Tree,
    agent_performance: Tree,
}

impl BrainStore {
    /// Opens or creates the brain database at the given path. Tree creation
    /// is idempotent; a failure here is fatal at startup.
    pub fn open_path<P: AsRef<Path>>(path: P) -> BrainResult<Self> {
        let db = sled::open(path)?;
        let working_memory = db.open_tree(TREE_WORKING_MEMORY)?;
        let task_queue = db.open_tree(TREE_TASK_QUEUE)?;
        let thought_log = db.open_tree(TREE_THOUGHT_LOG)?;
        let knowledge_store = db.open_tree(TREE_KNOWLEDGE_STORE)?;
        let knowledge_graph = db.open_tree(TREE_KNOWLEDGE_GRAPH)?;
        let agent_performance = db.open_tree(TREE_AGENT_PERFORMANCE)?;
        Ok(Self {
            db,
            working_memory,
            task_queue,
            thought_log,
            knowledge_store,
            knowledge_graph,
            agent_performance,
        })
    }

    /// Flushes all trees to disk. Used at session shutdown as a durability
    /// barrier before the process exits.
    pub fn flush(&self) -> BrainResult<()> {
        self.db.flush()?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Working memory
    // -------------------------------------------------------------------------

    /// Idempotent upsert of the single working-memory row for a session.
    /// Last write wins.
    pub fn upsert_working_memory(&self, state: &WorkingMemoryState) -> BrainResult<()> {
        let bytes = serde_json::to_vec(state)?;
        self.working_memory
            .insert(state.session_id.as_bytes(), bytes)
            .map_err(|e| {
                tracing::error!(
                    target: "noesis::store",
                    session = %state.session_id,
                    error = %e,
                    "upsert_working_memory failed"
                );
                BrainError::from(e)
            })?;
        Ok(())
    }

    pub fn get_working_memory(&self, session_id: &str) -> BrainResult<Option<WorkingMemoryState>> {
        let v = self.working_memory.get(session_id.as_bytes())?;
        Ok(v.and_then(|iv| WorkingMemoryState::from_bytes(&iv)))
    }

    // -------------------------------------------------------------------------
    // Task queue
    // -------------------------------------------------------------------------

    pub fn add_task(&self, task: &TaskRecord) -> BrainResult<()> {
        let bytes = serde_json::to_vec(task)?;
        self.task_queue.insert(task.task_id.as_bytes(), bytes)?;
        tracing::debug!(
            target: "noesis::store",
            task_id = %task.task_id,
            task_type = %task.task_type,
            priority = task.priority,
            "task queued"
        );
        Ok(())
    }

    pub fn get_task(&self, task_id: &str) -> BrainResult<Option<TaskRecord>> {
        let v = self.task_queue.get(task_id.as_bytes())?;
        Ok(v.and_then(|iv| TaskRecord::from_bytes(&iv)))
    }

    /// Returns the highest-priority Pending task, ties broken by earliest
    /// `created_at`. Optionally filtered to tasks assigned to `agent_type`.
    pub fn get_next_task(&self, agent_type: Option<&str>) -> BrainResult<Option<TaskRecord>> {
        let mut best: Option<TaskRecord> = None;
        for entry in self.task_queue.iter() {
            let (_, value) = entry?;
            let Some(task) = TaskRecord::from_bytes(&value) else {
                continue;
            };
            if task.status != TaskStatus::Pending {
                continue;
            }
            if let Some(agent) = agent_type {
                if task.agent_assigned.as_deref() != Some(agent) {
                    continue;
                }
            }
            let better = match &best {
                None => true,
                Some(current) => {
                    task.priority > current.priority
                        || (task.priority == current.priority
                            && task.created_at < current.created_at)
                }
            };
            if better {
                best = Some(task);
            }
        }
        Ok(best)
    }

    /// Moves a task through its lifecycle. Writing the same status twice is a
    /// no-op; any other transition out of a terminal state is rejected.
    pub fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        signal: Option<&str>,
    ) -> BrainResult<TaskRecord> {
        let mut task = self
            .get_task(task_id)?
            .ok_or_else(|| BrainError::NotFound(format!("task {task_id}")))?;

        if task.status == status {
            return Ok(task);
        }
        if !task.status.can_transition_to(status) {
            tracing::warn!(
                target: "noesis::store",
                task_id = %task_id,
                from = %task.status,
                to = %status,
                "rejected task transition"
            );
            return Err(BrainError::InvalidTransition {
                task_id: task_id.to_string(),
                from: task.status,
                to: status,
            });
        }

        task.status = status;
        task.updated_at = now_epoch_ms();
        if let Some(signal) = signal {
            task.completion_signal = Some(signal.to_string());
        }
        let bytes = serde_json::to_vec(&task)?;
        self.task_queue.insert(task.task_id.as_bytes(), bytes)?;
        Ok(task)
    }

    // -------------------------------------------------------------------------
    // Thought log (append-only)
    // -------------------------------------------------------------------------

    /// Inserts a thought. The key embeds the timestamp so chronological scans
    /// come back ordered; thoughts are never mutated after insertion.
    pub fn log_thought(&self, thought: &ThoughtRecord) -> BrainResult<()> {
        let key = format!("{:020}/{}", thought.timestamp_ms, thought.thought_id);
        let bytes = serde_json::to_vec(thought)?;
        self.thought_log.insert(key.as_bytes(), bytes).map_err(|e| {
            tracing::error!(
                target: "noesis::store",
                thought_id = %thought.thought_id,
                error = %e,
                "log_thought failed"
            );
            BrainError::from(e)
        })?;
        Ok(())
    }

    /// Most recent thoughts, newest first.
    pub fn recent_thoughts(&self, limit: usize) -> BrainResult<Vec<ThoughtRecord>> {
        let mut out = Vec::with_capacity(limit);
        for entry in self.thought_log.iter().rev() {
            let (_, value) = entry?;
            if let Some(thought) = ThoughtRecord::from_bytes(&value) {
                out.push(thought);
            }
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    // -------------------------------------------------------------------------
    // Knowledge store (memories)
    // -------------------------------------------------------------------------

    /// Upserts a memory by id. Content is immutable (the id is
    /// content-derived); on conflict the existing `created_at` and the larger
    /// `access_count` are preserved so access metadata never regresses.
    pub fn store_memory(&self, memory: &MemoryRecord) -> BrainResult<()> {
        let mut record = memory.clone();
        if let Some(existing) = self.get_memory(&memory.memory_id)? {
            record.created_at = existing.created_at;
            record.access_count = record.access_count.max(existing.access_count);
            record.last_accessed = record.last_accessed.max(existing.last_accessed);
        }
        let bytes = serde_json::to_vec(&record)?;
        self.knowledge_store
            .insert(record.memory_id.as_bytes(), bytes)?;
        Ok(())
    }

    pub fn get_memory(&self, memory_id: &str) -> BrainResult<Option<MemoryRecord>> {
        let v = self.knowledge_store.get(memory_id.as_bytes())?;
        Ok(v.and_then(|iv| MemoryRecord::from_bytes(&iv)))
    }

    /// Bumps access metadata for a retrieved memory. `access_count` is
    /// monotonically non-decreasing.
    pub fn touch_memory(&self, memory_id: &str) -> BrainResult<()> {
        let Some(mut record) = self.get_memory(memory_id)? else {
            return Err(BrainError::NotFound(format!("memory {memory_id}")));
        };
        record.access_count += 1;
        record.last_accessed = now_epoch_ms();
        let bytes = serde_json::to_vec(&record)?;
        self.knowledge_store
            .insert(record.memory_id.as_bytes(), bytes)?;
        Ok(())
    }

    /// Returns memories most-recently-accessed first, optionally filtered by
    /// type, capped at `limit`.
    pub fn search_memories(
        &self,
        memory_type: Option<&str>,
        limit: usize,
    ) -> BrainResult<Vec<MemoryRecord>> {
        let mut records = Vec::new();
        for entry in self.knowledge_store.iter() {
            let (_, value) = entry?;
            let Some(record) = MemoryRecord::from_bytes(&value) else {
                continue;
            };
            if let Some(t) = memory_type {
                if record.memory_type != t {
                    continue;
                }
            }
            records.push(record);
        }
        records.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));
        records.truncate(limit);
        Ok(records)
    }

    // -------------------------------------------------------------------------
    // Knowledge graph
    // -------------------------------------------------------------------------

    pub fn add_knowledge_edge(&self, edge: &KnowledgeEdge) -> BrainResult<()> {
        let bytes = serde_json::to_vec(edge)?;
        self.knowledge_graph.insert(edge.edge_id.as_bytes(), bytes)?;
        Ok(())
    }

    /// Union of edges where `node` is source or target, confidence descending,
    /// capped at 20.
    pub fn get_related_concepts(&self, node: &str) -> BrainResult<Vec<KnowledgeEdge>> {
        let mut edges = Vec::new();
        for entry in self.knowledge_graph.iter() {
            let (_, value) = entry?;
            let Some(edge) = KnowledgeEdge::from_bytes(&value) else {
                continue;
            };
            if edge.source_node == node || edge.target_node == node {
                edges.push(edge);
            }
        }
        edges.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        edges.truncate(RELATED_CONCEPTS_CAP);
        Ok(edges)
    }

    /// Edges leaving `node` (directed). Used by transitive inference.
    pub fn get_outgoing_edges(&self, node: &str) -> BrainResult<Vec<KnowledgeEdge>> {
        let mut edges = Vec::new();
        for entry in self.knowledge_graph.iter() {
            let (_, value) = entry?;
            let Some(edge) = KnowledgeEdge::from_bytes(&value) else {
                continue;
            };
            if edge.source_node == node {
                edges.push(edge);
            }
        }
        Ok(edges)
    }

    // -------------------------------------------------------------------------
    // Agent performance
    // -------------------------------------------------------------------------

    pub fn upsert_agent_performance(&self, perf: &AgentPerformance) -> BrainResult<()> {
        let key = format!("{}/{}", perf.agent_type, perf.task_type);
        let bytes = serde_json::to_vec(perf)?;
        self.agent_performance.insert(key.as_bytes(), bytes)?;
        Ok(())
    }

    pub fn get_agent_performance(
        &self,
        agent_type: &str,
        task_type: &str,
    ) -> BrainResult<Option<AgentPerformance>> {
        let key = format!("{agent_type}/{task_type}");
        let v = self.agent_performance.get(key.as_bytes())?;
        Ok(v.and_then(|iv| AgentPerformance::from_bytes(&iv)))
    }

    // -------------------------------------------------------------------------
    // Stats
    // -------------------------------------------------------------------------

    /// Row counts plus task-status and memory-type histograms.
    pub fn get_stats(&self) -> BrainResult<BrainStats> {
        let mut stats = BrainStats {
            working_memory_rows: self.working_memory.len(),
            thoughts_total: self.thought_log.len(),
            knowledge_edges_total: self.knowledge_graph.len(),
            performance_rows: self.agent_performance.len(),
            ..BrainStats::default()
        };

        for entry in self.task_queue.iter() {
            let (_, value) = entry?;
            if let Some(task) = TaskRecord::from_bytes(&value) {
                stats.tasks_total += 1;
                *stats
                    .tasks_by_status
                    .entry(task.status.as_str().to_string())
                    .or_insert(0) += 1;
            }
        }
        for entry in self.knowledge_store.iter() {
            let (_, value) = entry?;
            if let Some(memory) = MemoryRecord::from_bytes(&value) {
                stats.memories_total += 1;
                *stats
                    .memories_by_type
                    .entry(memory.memory_type.clone())
                    .or_insert(0) += 1;
            }
        }
        Ok(stats)
    }
}
