//! Shared record types persisted by the Brain Store.
//!
//! Every record is a serde struct stored as JSON bytes in its own Sled tree,
//! with `to_bytes`/`from_bytes` helpers so callers never touch raw storage.

use serde::{Deserialize, Serialize};

/// Returns the current Unix timestamp in milliseconds.
pub fn now_epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// -----------------------------------------------------------------------------
// Cognitive state machine
// -----------------------------------------------------------------------------

/// State of the cognitive cycle for one session. Persisted in working memory
/// so a restarted process can see where the previous run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CognitiveState {
    /// Session is starting; storage and tools are being wired.
    #[default]
    Initializing,
    /// Pulling pending work and environment signals.
    Perceiving,
    /// Semantic search over stored memories for the perceived work.
    Recalling,
    /// Mapping perception + recall to a decision.
    Reasoning,
    /// Dispatching the decided action to a tool.
    Acting,
    /// Persisting experience/pattern memories and consolidating.
    Learning,
    /// No pending work and inactivity past the configured threshold.
    Idle,
    /// Externally requested freeze; progression resumes at Perceiving.
    Paused,
    /// A fatal loop failure ended the session.
    Error,
}

impl CognitiveState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CognitiveState::Initializing => "initializing",
            CognitiveState::Perceiving => "perceiving",
            CognitiveState::Recalling => "recalling",
            CognitiveState::Reasoning => "reasoning",
            CognitiveState::Acting => "acting",
            CognitiveState::Learning => "learning",
            CognitiveState::Idle => "idle",
            CognitiveState::Paused => "paused",
            CognitiveState::Error => "error",
        }
    }
}

impl std::fmt::Display for CognitiveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// -----------------------------------------------------------------------------
// Working memory — one live row per session
// -----------------------------------------------------------------------------

/// The single current-state row per session (active goal/task/cognitive state).
/// Writes are idempotent upserts; last write wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingMemoryState {
    /// Session identifier (primary key).
    pub session_id: String,
    /// Active goal, if any.
    #[serde(default)]
    pub current_goal_id: Option<String>,
    /// Task the session is currently working on, if any.
    #[serde(default)]
    pub current_task_id: Option<String>,
    /// Where the cognitive cycle currently is.
    #[serde(default)]
    pub cognitive_state: CognitiveState,
    /// Opaque structured context carried across cycles.
    #[serde(default)]
    pub context_data: serde_json::Value,
    /// Unix timestamp (ms) of the last upsert.
    pub last_update: i64,
}

impl WorkingMemoryState {
    /// Creates a fresh snapshot for a session with the current timestamp.
    pub fn new(session_id: impl Into<String>, state: CognitiveState) -> Self {
        Self {
            session_id: session_id.into(),
            current_goal_id: None,
            current_task_id: None,
            cognitive_state: state,
            context_data: serde_json::json!({}),
            last_update: now_epoch_ms(),
        }
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.current_task_id = Some(task_id.into());
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context_data = context;
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

// -----------------------------------------------------------------------------
// Task queue
// -----------------------------------------------------------------------------

/// Lifecycle status of a queued task.
///
/// Allowed transitions: Pending → Delegated → {Completed, Failed}. A Pending
/// task may also move straight to a terminal state (trivial work finished
/// without dispatch). Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Delegated,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Completed and Failed are terminal: no transition leaves them.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Delegated => "delegated",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// Returns true if a task in `self` may move to `next`.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match self {
            TaskStatus::Pending => next != TaskStatus::Pending,
            TaskStatus::Delegated => next.is_terminal(),
            TaskStatus::Completed | TaskStatus::Failed => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One queued unit of work. Higher `priority` is more urgent; ties are broken
/// by earliest `created_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Globally unique task identifier (primary key).
    pub task_id: String,
    /// Goal this task contributes to, if any.
    #[serde(default)]
    pub parent_goal_id: Option<String>,
    /// Human-readable description of the work.
    pub description: String,
    /// Category used for action mapping (e.g. "development", "research", "analysis").
    pub task_type: String,
    pub status: TaskStatus,
    /// Higher = more urgent.
    pub priority: i64,
    /// Agent the task was assigned to, once delegated.
    #[serde(default)]
    pub agent_assigned: Option<String>,
    /// Workspace the assignee should operate in, if any.
    #[serde(default)]
    pub workspace_path: Option<String>,
    /// Unix timestamp (ms) when the task was created.
    pub created_at: i64,
    /// Unix timestamp (ms) of the last status change.
    pub updated_at: i64,
    /// Signal reported at completion (e.g. a result summary or error note).
    #[serde(default)]
    pub completion_signal: Option<String>,
}

impl TaskRecord {
    /// Creates a Pending task with the current timestamp.
    pub fn new(
        description: impl Into<String>,
        task_type: impl Into<String>,
        priority: i64,
    ) -> Self {
        let now = now_epoch_ms();
        Self {
            task_id: format!("task_{}", uuid::Uuid::new_v4()),
            parent_goal_id: None,
            description: description.into(),
            task_type: task_type.into(),
            status: TaskStatus::Pending,
            priority,
            agent_assigned: None,
            workspace_path: None,
            created_at: now,
            updated_at: now,
            completion_signal: None,
        }
    }

    pub fn with_parent_goal(mut self, goal_id: impl Into<String>) -> Self {
        self.parent_goal_id = Some(goal_id.into());
        self
    }

    pub fn with_agent(mut self, agent_type: impl Into<String>) -> Self {
        self.agent_assigned = Some(agent_type.into());
        self
    }

    pub fn with_workspace(mut self, path: impl Into<String>) -> Self {
        self.workspace_path = Some(path.into());
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

// -----------------------------------------------------------------------------
// Thought log — append-only audit trail of the cognitive cycle
// -----------------------------------------------------------------------------

/// One cycle's audit entry. Never mutated after insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThoughtRecord {
    /// Unique identifier (primary key).
    pub thought_id: String,
    /// Unix timestamp (ms) when the thought was logged.
    pub timestamp_ms: i64,
    /// Kind of decision this cycle made (e.g. "task_execution", "wait", "cycle_error").
    pub decision_type: String,
    /// Free-text reasoning trace (the reasoning chain joined into prose).
    pub reasoning: String,
    /// Structured context: perception size, recalled memory count, cycle number.
    #[serde(default)]
    pub context: serde_json::Value,
    /// Action the cycle dispatched.
    pub action_taken: String,
    /// Outcome summary of the dispatched action.
    pub outcome: String,
    /// Learning extracted during the learn phase, if any.
    #[serde(default)]
    pub learning_extracted: Option<String>,
}

impl ThoughtRecord {
    /// Creates a thought with the current timestamp and a fresh id.
    pub fn now(decision_type: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Self {
            thought_id: format!("thought_{}", uuid::Uuid::new_v4()),
            timestamp_ms: now_epoch_ms(),
            decision_type: decision_type.into(),
            reasoning: reasoning.into(),
            context: serde_json::json!({}),
            action_taken: String::new(),
            outcome: String::new(),
            learning_extracted: None,
        }
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action_taken = action.into();
        self
    }

    pub fn with_outcome(mut self, outcome: impl Into<String>) -> Self {
        self.outcome = outcome.into();
        self
    }

    pub fn with_learning(mut self, learning: impl Into<String>) -> Self {
        self.learning_extracted = Some(learning.into());
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

// -----------------------------------------------------------------------------
// Knowledge store — embedded memories
// -----------------------------------------------------------------------------

/// A stored memory with its embedding vector. Content is immutable once
/// stored (the id is content-derived); only access metadata mutates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Content-derived identifier: `mem_{content_hash:016x}_{created_at}`.
    pub memory_id: String,
    pub content: String,
    /// Fixed-length embedding (128 dims with the default embedder).
    pub embedding: Vec<f32>,
    /// Memory category: "experience", "pattern", "error", "task_execution",
    /// "consolidated", "reflection", ...
    pub memory_type: String,
    /// Where the memory came from (e.g. "cognitive_cycle", "consolidation").
    pub source_type: String,
    /// Confidence in the memory's accuracy, clamped to [0, 1].
    pub confidence_score: f32,
    /// Unix timestamp (ms) when first stored.
    pub created_at: i64,
    /// Unix timestamp (ms) of the most recent retrieval.
    pub last_accessed: i64,
    /// Monotonically non-decreasing retrieval counter.
    pub access_count: u64,
}

impl MemoryRecord {
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

// -----------------------------------------------------------------------------
// Knowledge graph — directed, confidence-weighted edges
// -----------------------------------------------------------------------------

/// A directed edge between two concepts. Multiple edges between the same pair
/// with different relationship types are allowed; edges are append-only facts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEdge {
    /// Unique identifier (primary key).
    pub edge_id: String,
    pub source_node: String,
    pub target_node: String,
    /// E.g. "co_occurs_with", "causes", "related_to".
    pub relationship_type: String,
    /// Edge confidence, clamped to [0, 1].
    pub confidence: f32,
    /// Unix timestamp (ms) when the edge was recorded.
    pub created_at: i64,
    /// What produced the edge (e.g. the memory_id it was extracted from).
    #[serde(default)]
    pub evidence: Option<String>,
}

impl KnowledgeEdge {
    /// Creates an edge with a fresh id and the current timestamp.
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        relationship_type: impl Into<String>,
        confidence: f32,
    ) -> Self {
        Self {
            edge_id: format!("edge_{}", uuid::Uuid::new_v4()),
            source_node: source.into(),
            target_node: target.into(),
            relationship_type: relationship_type.into(),
            confidence: confidence.clamp(0.0, 1.0),
            created_at: now_epoch_ms(),
            evidence: None,
        }
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = Some(evidence.into());
        self
    }

    /// The endpoint opposite `node`, or None if `node` is not on this edge.
    pub fn other_endpoint<'a>(&'a self, node: &str) -> Option<&'a str> {
        if self.source_node == node {
            Some(self.target_node.as_str())
        } else if self.target_node == node {
            Some(self.source_node.as_str())
        } else {
            None
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

// -----------------------------------------------------------------------------
// Agent performance — aggregated, recomputed incrementally
// -----------------------------------------------------------------------------

/// Running performance aggregate for one (agent_type, task_type) pair.
/// Not an append log: the single row is recomputed on every completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPerformance {
    /// Unique identifier for the aggregate row.
    pub performance_id: String,
    pub agent_type: String,
    pub task_type: String,
    /// Exact running mean of completion outcomes in [0, 1].
    pub success_rate: f32,
    /// Exact running mean of completion time in milliseconds.
    pub avg_completion_time_ms: f64,
    /// Exponential moving average of reported quality (recent work dominates).
    pub quality_score: f32,
    /// Number of completions folded into the aggregate so far.
    pub total_tasks: u64,
    /// Distinct failure signals observed (most recent last, capped).
    #[serde(default)]
    pub failure_patterns: Vec<String>,
    /// Suggestions extracted by self-reflection.
    #[serde(default)]
    pub improvement_suggestions: Vec<String>,
    /// Unix timestamp (ms) of the last recomputation.
    pub last_update: i64,
}

/// Cap on remembered failure patterns per aggregate row.
const MAX_FAILURE_PATTERNS: usize = 10;

/// Smoothing factor for the quality EMA.
const QUALITY_EMA_ALPHA: f32 = 0.3;

impl AgentPerformance {
    /// Creates a neutral aggregate for a pair that has no history yet.
    pub fn new(agent_type: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            performance_id: format!("perf_{}", uuid::Uuid::new_v4()),
            agent_type: agent_type.into(),
            task_type: task_type.into(),
            success_rate: 0.0,
            avg_completion_time_ms: 0.0,
            quality_score: 0.5,
            total_tasks: 0,
            failure_patterns: Vec::new(),
            improvement_suggestions: Vec::new(),
            last_update: now_epoch_ms(),
        }
    }

    /// Folds one completed task into the aggregate.
    pub fn record_completion(
        &mut self,
        success: bool,
        completion_time_ms: f64,
        quality_score: f32,
        failure_pattern: Option<&str>,
    ) {
        let n = self.total_tasks as f64;
        let outcome = if success { 1.0 } else { 0.0 };
        self.success_rate = (((self.success_rate as f64) * n + outcome) / (n + 1.0)) as f32;
        self.avg_completion_time_ms = (self.avg_completion_time_ms * n + completion_time_ms) / (n + 1.0);
        self.quality_score = if self.total_tasks == 0 {
            quality_score.clamp(0.0, 1.0)
        } else {
            self.quality_score * (1.0 - QUALITY_EMA_ALPHA)
                + quality_score.clamp(0.0, 1.0) * QUALITY_EMA_ALPHA
        };
        self.total_tasks += 1;
        if let Some(pattern) = failure_pattern {
            if !self.failure_patterns.iter().any(|p| p == pattern) {
                self.failure_patterns.push(pattern.to_string());
                if self.failure_patterns.len() > MAX_FAILURE_PATTERNS {
                    self.failure_patterns.remove(0);
                }
            }
        }
        self.last_update = now_epoch_ms();
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_reject_transitions() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Delegated));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Delegated.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::Delegated.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::Delegated));
    }

    #[test]
    fn performance_running_mean() {
        let mut perf = AgentPerformance::new("developer", "development");
        perf.record_completion(true, 1000.0, 0.9, None);
        perf.record_completion(false, 3000.0, 0.2, Some("timeout"));
        assert!((perf.success_rate - 0.5).abs() < 1e-6);
        assert!((perf.avg_completion_time_ms - 2000.0).abs() < 1e-6);
        assert_eq!(perf.total_tasks, 2);
        assert_eq!(perf.failure_patterns, vec!["timeout".to_string()]);
    }

    #[test]
    fn failure_patterns_deduplicated() {
        let mut perf = AgentPerformance::new("researcher", "research");
        perf.record_completion(false, 100.0, 0.1, Some("timeout"));
        perf.record_completion(false, 100.0, 0.1, Some("timeout"));
        assert_eq!(perf.failure_patterns.len(), 1);
    }

    #[test]
    fn record_round_trip() {
        let task = TaskRecord::new("build the thing", "development", 7)
            .with_parent_goal("goal-1")
            .with_agent("developer");
        let restored = TaskRecord::from_bytes(&task.to_bytes()).unwrap();
        assert_eq!(restored.task_id, task.task_id);
        assert_eq!(restored.status, TaskStatus::Pending);
        assert_eq!(restored.priority, 7);
    }
}
