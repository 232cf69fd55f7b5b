//! Orchestrator: top-level composition of store, memory, graph reasoner,
//! decision engine, and the per-session cognitive engines.
//!
//! Sessions are independent cognitive loops over the same brain. The
//! orchestrator wires each new engine to the built-in tools (enhanced
//! delegation, memory search, knowledge exploration, self-reflection) and
//! owns the task lifecycle bookkeeping that happens outside a cycle.

use crate::config::BrainConfig;
use crate::decision::DecisionEngine;
use crate::embedding::{Embedder, HashEmbedder};
use crate::engine::{CognitiveEngine, CognitiveTool, EngineStatus};
use crate::error::{BrainError, BrainResult, ToolError};
use crate::graph::{GraphReasoner, DEFAULT_MAX_PATH_LENGTH};
use crate::memory::{MemoryManager, MemoryMatch};
use crate::shared::{AgentPerformance, TaskRecord, TaskStatus};
use crate::store::{BrainStats, BrainStore};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// Quality below which a completed task auto-triggers reflection.
const REFLECTION_QUALITY_THRESHOLD: f32 = 0.6;

/// Recent thoughts scanned by a reflection pass.
const REFLECTION_WINDOW: usize = 20;

/// Memories folded into an enhanced delegation prompt.
const DELEGATION_MEMORY_CAP: usize = 3;

/// Hands work to an external agent. Injected; the core never talks to an
/// agent runtime directly.
#[async_trait]
pub trait TaskDelegator: Send + Sync {
    /// Delegates the described work with an enriched prompt and returns the
    /// agent's acknowledgement or result summary.
    async fn delegate(&self, description: &str, prompt: &str) -> Result<String, ToolError>;
}

/// Combined view over the store and every live session.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OrchestratorStatus {
    pub active_sessions: Vec<EngineStatus>,
    pub stats: BrainStats,
}

struct SessionHandle {
    engine: Arc<CognitiveEngine>,
    join: tokio::task::JoinHandle<()>,
}

/// The brain's outer surface.
pub struct Orchestrator {
    config: BrainConfig,
    store: Arc<BrainStore>,
    memory: Arc<MemoryManager>,
    graph: Arc<GraphReasoner>,
    decisions: Arc<DecisionEngine>,
    delegator: Option<Arc<dyn TaskDelegator>>,
    sessions: DashMap<String, SessionHandle>,
}

impl Orchestrator {
    /// Opens the brain database at `config.data_dir` and wires the default
    /// hash embedder. Fatal on storage failure.
    pub fn new(config: BrainConfig, decisions: Arc<DecisionEngine>) -> BrainResult<Self> {
        Self::with_embedder(config, decisions, Arc::new(HashEmbedder::new()))
    }

    pub fn with_embedder(
        config: BrainConfig,
        decisions: Arc<DecisionEngine>,
        embedder: Arc<dyn Embedder>,
    ) -> BrainResult<Self> {
        let store = Arc::new(BrainStore::open_path(&config.data_dir)?);
        let memory = Arc::new(MemoryManager::new(store.clone(), embedder));
        let graph = Arc::new(GraphReasoner::new(store.clone()));
        Ok(Self {
            config,
            store,
            memory,
            graph,
            decisions,
            delegator: None,
            sessions: DashMap::new(),
        })
    }

    pub fn with_delegator(mut self, delegator: Arc<dyn TaskDelegator>) -> Self {
        self.delegator = Some(delegator);
        self
    }

    pub fn store(&self) -> &Arc<BrainStore> {
        &self.store
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    pub fn graph(&self) -> &Arc<GraphReasoner> {
        &self.graph
    }

    pub fn decisions(&self) -> &Arc<DecisionEngine> {
        &self.decisions
    }

    // -------------------------------------------------------------------------
    // Sessions
    // -------------------------------------------------------------------------

    /// Starts a cognitive loop for a session. One loop per session id; the
    /// entry guard makes the check-and-spawn atomic under concurrent starts.
    pub fn start_consciousness(&self, session_id: &str) -> BrainResult<()> {
        match self.sessions.entry(session_id.to_string()) {
            Entry::Occupied(_) => Err(BrainError::Session(format!(
                "session {session_id} is already running"
            ))),
            Entry::Vacant(slot) => {
                let engine = self.build_engine(session_id);
                let join = engine.clone().start();
                slot.insert(SessionHandle { engine, join });
                tracing::info!(
                    target: "noesis::orchestrator",
                    session = session_id,
                    "consciousness started"
                );
                Ok(())
            }
        }
    }

    /// Stops a session's loop, waits for it to wind down, and flushes the
    /// store as a durability barrier.
    pub async fn stop_consciousness(&self, session_id: &str) -> BrainResult<()> {
        let (_, handle) = self.sessions.remove(session_id).ok_or_else(|| {
            BrainError::Session(format!("session {session_id} is not running"))
        })?;
        handle.engine.stop();
        if let Err(e) = handle.join.await {
            tracing::warn!(
                target: "noesis::orchestrator",
                session = session_id,
                error = %e,
                "cognitive loop join failed"
            );
        }
        self.store.flush()?;
        tracing::info!(
            target: "noesis::orchestrator",
            session = session_id,
            "consciousness stopped"
        );
        Ok(())
    }

    /// Builds a session engine wired to the built-in tools. The delegation
    /// tool is only attached when a delegator capability was injected; the
    /// engine's own queue-only delegation covers the rest.
    fn build_engine(&self, session_id: &str) -> Arc<CognitiveEngine> {
        let engine = Arc::new(CognitiveEngine::new(
            session_id,
            self.config.clone(),
            self.store.clone(),
            self.memory.clone(),
        ));
        if let Some(delegator) = &self.delegator {
            engine.register_tool(Arc::new(DelegationTool {
                store: self.store.clone(),
                memory: self.memory.clone(),
                delegator: delegator.clone(),
                similarity_threshold: self.config.similarity_threshold,
            }));
        }
        engine.register_tool(Arc::new(MemorySearchTool {
            memory: self.memory.clone(),
            similarity_threshold: self.config.similarity_threshold,
        }));
        engine.register_tool(Arc::new(KnowledgeExplorationTool {
            graph: self.graph.clone(),
        }));
        engine.register_tool(Arc::new(ReflectionTool {
            store: self.store.clone(),
            memory: self.memory.clone(),
        }));
        engine
    }

    // -------------------------------------------------------------------------
    // Tasks
    // -------------------------------------------------------------------------

    /// Queues a task for the cognitive loops to pick up. Returns the task id.
    pub fn delegate_task(
        &self,
        description: &str,
        task_type: &str,
        priority: i64,
        agent: Option<&str>,
    ) -> BrainResult<String> {
        let mut task = TaskRecord::new(description, task_type, priority);
        if let Some(agent) = agent {
            task = task.with_agent(agent);
        }
        self.store.add_task(&task)?;
        tracing::info!(
            target: "noesis::orchestrator",
            task_id = %task.task_id,
            task_type = task_type,
            priority,
            "task queued"
        );
        Ok(task.task_id)
    }

    /// Records a finished task: moves it to a terminal status, folds the
    /// outcome into the agent's performance aggregate, stores a
    /// `task_execution` memory, and auto-reflects on poor outcomes.
    pub async fn process_task_completion(
        &self,
        task_id: &str,
        success: bool,
        quality_score: f32,
        signal: Option<&str>,
    ) -> BrainResult<()> {
        let status = if success {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        let task = self.store.update_task_status(task_id, status, signal)?;

        let agent = task
            .agent_assigned
            .clone()
            .unwrap_or_else(|| "generalist".to_string());
        let completion_time_ms = (task.updated_at - task.created_at).max(0) as f64;
        let mut perf = self
            .store
            .get_agent_performance(&agent, &task.task_type)?
            .unwrap_or_else(|| AgentPerformance::new(&agent, &task.task_type));
        let failure_pattern = if success { None } else { signal };
        perf.record_completion(success, completion_time_ms, quality_score, failure_pattern);
        self.store.upsert_agent_performance(&perf)?;

        let execution = format!(
            "Task {} ({}) {} by {} with quality {:.2}{}",
            task.description,
            task.task_type,
            if success { "completed" } else { "failed" },
            agent,
            quality_score,
            signal.map(|s| format!(": {s}")).unwrap_or_default()
        );
        self.memory.store_memory(
            &execution,
            "task_execution",
            "orchestrator",
            quality_score.clamp(0.0, 1.0),
        )?;
        // New co-occurrence edges may have landed; stale cache entries would
        // hide them from the knowledge tool.
        self.graph.clear_cache();

        tracing::info!(
            target: "noesis::orchestrator",
            task_id = task_id,
            agent = %agent,
            success,
            quality = quality_score,
            "task completion processed"
        );

        if !success || quality_score < REFLECTION_QUALITY_THRESHOLD {
            self.trigger_self_reflection()?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    /// Semantic memory lookup with the configured similarity threshold.
    pub fn query_memory(
        &self,
        query: &str,
        memory_type: Option<&str>,
        limit: usize,
    ) -> BrainResult<Vec<MemoryMatch>> {
        self.memory
            .search_memories(query, memory_type, limit, self.config.similarity_threshold)
    }

    pub fn get_status(&self) -> BrainResult<OrchestratorStatus> {
        let mut active_sessions = Vec::with_capacity(self.sessions.len());
        for entry in self.sessions.iter() {
            active_sessions.push(entry.value().engine.get_status()?);
        }
        Ok(OrchestratorStatus {
            active_sessions,
            stats: self.store.get_stats()?,
        })
    }

    /// Scans recent thoughts and agent failure patterns and stores a
    /// `reflection` memory. Returns the extracted learning.
    pub fn trigger_self_reflection(&self) -> BrainResult<String> {
        run_reflection(&self.store, &self.memory)
    }
}

/// Shared by `trigger_self_reflection` and the in-cycle reflection tool.
fn run_reflection(store: &BrainStore, memory: &MemoryManager) -> BrainResult<String> {
    let thoughts = store.recent_thoughts(REFLECTION_WINDOW)?;
    let total = thoughts.len();
    let failures: Vec<_> = thoughts
        .iter()
        .filter(|t| {
            t.decision_type == "cycle_error"
                || t.outcome.starts_with("error")
                || t.outcome.contains("tool error")
        })
        .collect();

    let learning = if total == 0 {
        "No recent activity to reflect on; waiting for work.".to_string()
    } else if failures.is_empty() {
        format!("Last {total} cycles ran clean; current strategy is holding.")
    } else {
        // Name the action that fails most so the learning is actionable.
        let mut by_action: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
        for t in &failures {
            *by_action.entry(t.action_taken.as_str()).or_insert(0) += 1;
        }
        let worst = by_action
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .map(|(action, count)| format!("{action} ({count} failures)"))
            .unwrap_or_else(|| "unknown".to_string());
        format!(
            "{} of the last {total} cycles failed; most frequent failing action: {worst}. \
             Most recent failure: {}",
            failures.len(),
            failures[0].outcome
        )
    };

    memory.store_memory(
        &format!("Reflection: {learning}"),
        "reflection",
        "self_reflection",
        0.7,
    )?;
    tracing::info!(
        target: "noesis::orchestrator",
        cycles_scanned = total,
        failures = failures.len(),
        "self-reflection stored"
    );
    Ok(learning)
}

// -----------------------------------------------------------------------------
// Built-in tools
// -----------------------------------------------------------------------------

/// Enhanced delegation: enriches the prompt with relevant memories and a
/// complexity estimate, hands off to the injected delegator, then marks the
/// task delegated.
struct DelegationTool {
    store: Arc<BrainStore>,
    memory: Arc<MemoryManager>,
    delegator: Arc<dyn TaskDelegator>,
    similarity_threshold: f32,
}

#[async_trait]
impl CognitiveTool for DelegationTool {
    fn name(&self) -> &str {
        "delegate_to_agent"
    }

    async fn execute(&self, input: &serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let task_id = input
            .get("task_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::Failed("delegation input lacks a task_id".to_string()))?;
        let description = input
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        let relevant = self
            .memory
            .search_memories(
                description,
                Some("task_execution"),
                DELEGATION_MEMORY_CAP,
                self.similarity_threshold,
            )
            .map_err(|e| ToolError::Failed(e.to_string()))?;
        let complexity = estimate_complexity(description, relevant.len());

        let mut prompt = format!("Task: {description}\nComplexity estimate: {complexity}/10\n");
        if !relevant.is_empty() {
            prompt.push_str("Relevant past experience:\n");
            for m in &relevant {
                prompt.push_str(&format!("- {}\n", m.record.content));
            }
        }

        let response = self.delegator.delegate(description, &prompt).await?;
        self.store
            .update_task_status(task_id, TaskStatus::Delegated, None)
            .map_err(|e| ToolError::Failed(e.to_string()))?;

        Ok(serde_json::json!({
            "delegated": true,
            "task_id": task_id,
            "complexity": complexity,
            "agent_response": response,
        }))
    }
}

/// Complexity grows with description length and shrinks with prior
/// experience on similar work. Clamped to 1..=10.
fn estimate_complexity(description: &str, prior_experience: usize) -> u8 {
    let words = description.split_whitespace().count();
    let base = 2 + (words / 12);
    base.saturating_sub(prior_experience.min(2))
        .clamp(1, 10) as u8
}

/// Semantic memory search exposed as an in-cycle tool.
struct MemorySearchTool {
    memory: Arc<MemoryManager>,
    similarity_threshold: f32,
}

#[async_trait]
impl CognitiveTool for MemorySearchTool {
    fn name(&self) -> &str {
        "memory_search"
    }

    async fn execute(&self, input: &serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let query = input
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::Failed("memory_search input lacks a query".to_string()))?;
        let limit = input
            .get("limit")
            .and_then(|v| v.as_u64())
            .unwrap_or(5) as usize;
        let hits = self
            .memory
            .search_memories(query, None, limit, self.similarity_threshold)
            .map_err(|e| ToolError::Failed(e.to_string()))?;
        let results: Vec<serde_json::Value> = hits
            .iter()
            .map(|m| {
                serde_json::json!({
                    "content": m.record.content,
                    "memory_type": m.record.memory_type,
                    "similarity": m.similarity,
                })
            })
            .collect();
        Ok(serde_json::json!({ "results": results }))
    }
}

/// Graph exploration plus transitive inference for a concept. With a
/// `target` in the input it also reports the connection path between the two.
struct KnowledgeExplorationTool {
    graph: Arc<GraphReasoner>,
}

#[async_trait]
impl CognitiveTool for KnowledgeExplorationTool {
    fn name(&self) -> &str {
        "knowledge_exploration"
    }

    async fn execute(&self, input: &serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let concept = input.get("concept").and_then(|v| v.as_str()).ok_or_else(|| {
            ToolError::Failed("knowledge_exploration input lacks a concept".to_string())
        })?;
        let edges = self
            .graph
            .explore_concept(concept)
            .map_err(|e| ToolError::Failed(e.to_string()))?;
        let inferred = self
            .graph
            .infer_new_relationships(concept)
            .map_err(|e| ToolError::Failed(e.to_string()))?;
        let path = match input.get("target").and_then(|v| v.as_str()) {
            Some(target) => self
                .graph
                .find_connection_path(concept, target, DEFAULT_MAX_PATH_LENGTH)
                .map_err(|e| ToolError::Failed(e.to_string()))?,
            None => None,
        };
        Ok(serde_json::json!({
            "concept": concept,
            "edges": edges,
            "inferred": inferred,
            "path": path,
        }))
    }
}

/// In-cycle access to the reflection pass.
struct ReflectionTool {
    store: Arc<BrainStore>,
    memory: Arc<MemoryManager>,
}

#[async_trait]
impl CognitiveTool for ReflectionTool {
    fn name(&self) -> &str {
        "self_reflection"
    }

    async fn execute(&self, _input: &serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let learning =
            run_reflection(&self.store, &self.memory).map_err(|e| ToolError::Failed(e.to_string()))?;
        Ok(serde_json::json!({ "learning": learning }))
    }
}
