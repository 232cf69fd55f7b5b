//! Cognitive Engine: the perceive → recall → reason → act → learn loop.
//!
//! One engine per session. `step()` runs exactly one cycle and is the unit
//! the background loop (and every test) drives. A phase error is caught at
//! the cycle boundary, logged, stored as an `error` memory, and the loop
//! continues; only a storage failure while recording the cycle outcome
//! escapes, moves the session to `Error`, and ends the loop after a final
//! working-memory snapshot.

use crate::config::BrainConfig;
use crate::error::{BrainResult, ToolError};
use crate::memory::MemoryManager;
use crate::shared::{
    now_epoch_ms, CognitiveState, TaskRecord, TaskStatus, ThoughtRecord, WorkingMemoryState,
};
use crate::store::BrainStore;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Memories recalled per pending task during the recall phase.
const RECALL_PER_TASK: usize = 3;

/// Memories recalled per perceived signal.
const RECALL_PER_SIGNAL: usize = 2;

/// An external observation fed into the perceive phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Where the signal came from (source name, channel, sensor).
    pub source: String,
    pub content: String,
    /// 0–10; interrupts compete on priority.
    pub priority: u8,
}

/// Pluggable producer of environment signals, polled once per cycle.
/// Implementations absorb their own failures and return what they have.
#[async_trait]
pub trait SignalSource: Send + Sync {
    fn name(&self) -> &str;

    async fn poll(&self) -> Vec<Signal>;
}

/// An action the act phase can dispatch by name. Tool failures are folded
/// into the cycle outcome, never propagated as cycle errors.
#[async_trait]
pub trait CognitiveTool: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, input: &serde_json::Value) -> Result<serde_json::Value, ToolError>;
}

/// Snapshot of one session's engine, assembled for `get_status`.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub session_id: String,
    pub running: bool,
    pub paused: bool,
    pub cycle_count: u64,
    pub cognitive_state: CognitiveState,
}

/// What the reason phase concluded for this cycle.
struct CycleDecision {
    decision_type: &'static str,
    action: String,
    reasoning: String,
    confidence: f32,
    input: serde_json::Value,
    task_id: Option<String>,
}

/// What the act phase produced.
struct ActionResult {
    success: bool,
    outcome: String,
}

/// One recall hit, tagged with what surfaced it.
#[derive(Debug, Clone, Serialize)]
struct RecalledMemory {
    source: String,
    similarity: f32,
    memory_id: String,
}

/// Everything one cycle needs recorded: thought fields plus idle flag.
struct CycleOutcome {
    decision_type: &'static str,
    action: String,
    reasoning: String,
    outcome: String,
    success: bool,
    task_id: Option<String>,
    signals: usize,
    interrupts: usize,
    recalled: Vec<RecalledMemory>,
    /// True when the phases failed and the error memory already stands in
    /// for the experience/pattern memories.
    phase_error: bool,
}

/// The per-session cognitive loop.
pub struct CognitiveEngine {
    session_id: String,
    config: BrainConfig,
    store: Arc<BrainStore>,
    memory: Arc<MemoryManager>,
    tools: DashMap<String, Arc<dyn CognitiveTool>>,
    signal_sources: DashMap<String, Arc<dyn SignalSource>>,
    interrupts: Mutex<VecDeque<Signal>>,
    running: AtomicBool,
    paused: AtomicBool,
    cycle_count: AtomicU64,
    /// Unix ms of the last cycle that perceived any work; drives Idle.
    last_activity: AtomicI64,
}

impl CognitiveEngine {
    pub fn new(
        session_id: impl Into<String>,
        config: BrainConfig,
        store: Arc<BrainStore>,
        memory: Arc<MemoryManager>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            config,
            store,
            memory,
            tools: DashMap::new(),
            signal_sources: DashMap::new(),
            interrupts: Mutex::new(VecDeque::new()),
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            cycle_count: AtomicU64::new(0),
            last_activity: AtomicI64::new(now_epoch_ms()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Registers a tool under its own name. A registered tool shadows the
    /// built-in action of the same name.
    pub fn register_tool(&self, tool: Arc<dyn CognitiveTool>) {
        tracing::debug!(
            target: "noesis::engine",
            session = %self.session_id,
            tool = tool.name(),
            "tool registered"
        );
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn register_signal_source(&self, source: Arc<dyn SignalSource>) {
        self.signal_sources
            .insert(source.name().to_string(), source);
    }

    /// Queues a priority interrupt. The next cycle handles the highest
    /// priority one before any queued task.
    pub fn push_interrupt(&self, signal: Signal) {
        self.lock_interrupts().push_back(signal);
    }

    /// Freezes the loop before its next cycle.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Re-enters the cycle at Perceiving.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Ends the loop after the current cycle finishes.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn get_status(&self) -> BrainResult<EngineStatus> {
        let cognitive_state = self
            .store
            .get_working_memory(&self.session_id)?
            .map(|wm| wm.cognitive_state)
            .unwrap_or_default();
        Ok(EngineStatus {
            session_id: self.session_id.clone(),
            running: self.running.load(Ordering::SeqCst),
            paused: self.paused.load(Ordering::SeqCst),
            cycle_count: self.cycle_count.load(Ordering::SeqCst),
            cognitive_state,
        })
    }

    /// Spawns the cognitive loop on the runtime. Serialized cycles; `pause`
    /// and `stop` flags are observed at the top of each iteration.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let engine = self;
        tokio::spawn(async move {
            tracing::info!(
                target: "noesis::engine",
                session = %engine.session_id,
                "cognitive loop starting"
            );
            let boot = WorkingMemoryState::new(&engine.session_id, CognitiveState::Initializing);
            if let Err(e) = engine.store.upsert_working_memory(&boot) {
                tracing::error!(
                    target: "noesis::engine",
                    session = %engine.session_id,
                    error = %e,
                    "failed to initialize working memory"
                );
                engine.running.store(false, Ordering::SeqCst);
                return;
            }

            while engine.running.load(Ordering::SeqCst) {
                if engine.paused.load(Ordering::SeqCst) {
                    let frozen =
                        WorkingMemoryState::new(&engine.session_id, CognitiveState::Paused);
                    if let Err(e) = engine.store.upsert_working_memory(&frozen) {
                        tracing::warn!(
                            target: "noesis::engine",
                            session = %engine.session_id,
                            error = %e,
                            "pause snapshot failed"
                        );
                    }
                    tokio::time::sleep(engine.config.cycle_delay).await;
                    continue;
                }

                if let Err(e) = engine.step().await {
                    tracing::error!(
                        target: "noesis::engine",
                        session = %engine.session_id,
                        error = %e,
                        "fatal cycle failure, ending session"
                    );
                    let snapshot =
                        WorkingMemoryState::new(&engine.session_id, CognitiveState::Error)
                            .with_context(serde_json::json!({
                                "shutdown": true,
                                "error": e.to_string(),
                            }));
                    if let Err(e) = engine.store.upsert_working_memory(&snapshot) {
                        tracing::error!(
                            target: "noesis::engine",
                            session = %engine.session_id,
                            error = %e,
                            "shutdown snapshot failed"
                        );
                    }
                    engine.running.store(false, Ordering::SeqCst);
                    break;
                }
                tokio::time::sleep(engine.config.cycle_delay).await;
            }
            tracing::info!(
                target: "noesis::engine",
                session = %engine.session_id,
                cycles = engine.cycle_count.load(Ordering::SeqCst),
                "cognitive loop ended"
            );
        })
    }

    /// Runs exactly one cognitive cycle. Phase errors are absorbed here;
    /// only failures while recording the cycle outcome propagate.
    pub async fn step(&self) -> BrainResult<()> {
        let cycle = self.cycle_count.fetch_add(1, Ordering::SeqCst) + 1;

        let outcome = match self.run_phases().await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(
                    target: "noesis::engine",
                    session = %self.session_id,
                    cycle,
                    error = %e,
                    "cycle phase error, continuing"
                );
                self.memory.store_memory(
                    &format!("Cycle {cycle} failed during phase execution: {e}"),
                    "error",
                    "cognitive_cycle",
                    0.9,
                )?;
                CycleOutcome {
                    decision_type: "cycle_error",
                    action: "none".to_string(),
                    reasoning: format!("phase error: {e}"),
                    outcome: format!("error: {e}"),
                    success: false,
                    task_id: None,
                    signals: 0,
                    interrupts: 0,
                    recalled: Vec::new(),
                    phase_error: true,
                }
            }
        };

        // Learn: experience every cycle, pattern classified by outcome,
        // consolidation every N cycles. Error cycles already stored their
        // error memory above.
        if !outcome.phase_error {
            let experience = format!(
                "Cycle {cycle}: decided {} ({}), outcome: {}",
                outcome.action, outcome.decision_type, outcome.outcome
            );
            let confidence = if outcome.success { 0.8 } else { 0.4 };
            self.memory
                .store_memory(&experience, "experience", "cognitive_cycle", confidence)?;

            let pattern = format!(
                "Action {} {} for {} work",
                outcome.action,
                if outcome.success { "succeeded" } else { "failed" },
                outcome.decision_type
            );
            self.memory
                .store_memory(&pattern, "pattern", "cognitive_cycle", confidence)?;

            if !outcome.success {
                self.memory.store_memory(
                    &format!(
                        "Cycle {cycle}: action {} failed: {}",
                        outcome.action, outcome.outcome
                    ),
                    "error",
                    "cognitive_cycle",
                    0.8,
                )?;
            }
        }
        if cycle % self.config.consolidation_interval == 0 {
            self.memory.consolidate_memories(&self.session_id)?;
        }

        // Record: exactly one thought per cycle plus one working-memory
        // upsert, regardless of how the phases went.
        let learning = if outcome.phase_error {
            None
        } else {
            Some(format!(
                "{} {} via {}",
                outcome.decision_type,
                if outcome.success { "succeeded" } else { "failed" },
                outcome.action
            ))
        };
        let mut thought = ThoughtRecord::now(outcome.decision_type, &outcome.reasoning)
            .with_context(serde_json::json!({
                "cycle": cycle,
                "signals": outcome.signals,
                "interrupts": outcome.interrupts,
                "recalled": outcome.recalled.len(),
                "recalled_memories": outcome.recalled,
            }))
            .with_action(&outcome.action)
            .with_outcome(&outcome.outcome);
        if let Some(learning) = learning {
            thought = thought.with_learning(learning);
        }
        self.store.log_thought(&thought)?;

        let idle = outcome.decision_type == "wait"
            && now_epoch_ms() - self.last_activity.load(Ordering::SeqCst)
                > self.config.idle_threshold.as_millis() as i64;
        let state = if idle {
            CognitiveState::Idle
        } else {
            CognitiveState::Learning
        };
        let mut snapshot = WorkingMemoryState::new(&self.session_id, state).with_context(
            serde_json::json!({
                "cycle": cycle,
                "last_action": outcome.action,
                "last_outcome": outcome.outcome,
            }),
        );
        if let Some(task_id) = outcome.task_id {
            snapshot = snapshot.with_task(task_id);
        }
        self.store.upsert_working_memory(&snapshot)?;
        Ok(())
    }

    /// Perceive → recall → reason → act. Any error here is a phase error.
    async fn run_phases(&self) -> BrainResult<CycleOutcome> {
        // Perceive: at most one pending task plus whatever the sources see.
        let task = self.store.get_next_task(None)?;
        // Snapshot the sources before polling; a map guard must not be held
        // across an await.
        let sources: Vec<Arc<dyn SignalSource>> = self
            .signal_sources
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut signals: Vec<Signal> = Vec::new();
        for source in sources {
            signals.extend(source.poll().await);
        }
        // One interrupt resolved per cycle: highest priority wins, FIFO on
        // ties. The rest stay queued and win later cycles.
        let (interrupt, interrupts_pending) = {
            let mut queue = self.lock_interrupts();
            let pending = queue.len();
            let mut best: Option<(usize, u8)> = None;
            for (i, s) in queue.iter().enumerate() {
                if best.map(|(_, p)| s.priority > p).unwrap_or(true) {
                    best = Some((i, s.priority));
                }
            }
            (best.and_then(|(i, _)| queue.remove(i)), pending)
        };
        if task.is_some() || !signals.is_empty() || interrupt.is_some() {
            self.last_activity.store(now_epoch_ms(), Ordering::SeqCst);
        }

        let result = self
            .resolve(task, signals, interrupt.as_ref(), interrupts_pending)
            .await;
        // A phase error must not lose the interrupt; back to the front so it
        // wins again next cycle.
        if result.is_err() {
            if let Some(signal) = interrupt {
                self.lock_interrupts().push_front(signal);
            }
        }
        result
    }

    /// Recall → reason → act over what the perceive phase gathered.
    async fn resolve(
        &self,
        task: Option<TaskRecord>,
        signals: Vec<Signal>,
        interrupt: Option<&Signal>,
        interrupts_pending: usize,
    ) -> BrainResult<CycleOutcome> {
        // Recall: prior task executions for the task, anything for signals.
        // Each hit stays tagged with its similarity and what surfaced it.
        let mut recalled: Vec<RecalledMemory> = Vec::new();
        if let Some(task) = &task {
            for m in self.memory.search_memories(
                &task.description,
                Some("task_execution"),
                RECALL_PER_TASK,
                self.config.similarity_threshold,
            )? {
                recalled.push(RecalledMemory {
                    source: format!("task:{}", task.task_id),
                    similarity: m.similarity,
                    memory_id: m.record.memory_id,
                });
            }
        }
        for signal in &signals {
            for m in self.memory.search_memories(
                &signal.content,
                None,
                RECALL_PER_SIGNAL,
                self.config.similarity_threshold,
            )? {
                recalled.push(RecalledMemory {
                    source: format!("signal:{}", signal.source),
                    similarity: m.similarity,
                    memory_id: m.record.memory_id,
                });
            }
        }

        // Reason: interrupts win unconditionally, then the queued task, then
        // wait with full confidence.
        let decision = if let Some(interrupt) = interrupt {
            CycleDecision {
                decision_type: "interrupt",
                action: "handle_interrupt".to_string(),
                reasoning: format!(
                    "priority {} interrupt from {} preempts queued work",
                    interrupt.priority, interrupt.source
                ),
                confidence: 0.9,
                input: serde_json::json!({
                    "source": interrupt.source,
                    "content": interrupt.content,
                }),
                task_id: None,
            }
        } else if let Some(task) = &task {
            let action = match task.task_type.as_str() {
                "development" => "delegate_to_agent",
                "research" => "web_research",
                "analysis" => "analyze_data",
                _ => "execute_generic_task",
            };
            CycleDecision {
                decision_type: "task_execution",
                action: action.to_string(),
                reasoning: format!(
                    "pending {} task {} mapped to {action}",
                    task.task_type, task.task_id
                ),
                confidence: 0.8,
                input: serde_json::json!({
                    "task_id": task.task_id,
                    "description": task.description,
                    "task_type": task.task_type,
                }),
                task_id: Some(task.task_id.clone()),
            }
        } else {
            CycleDecision {
                decision_type: "wait",
                action: "wait".to_string(),
                reasoning: "no pending work perceived".to_string(),
                confidence: 1.0,
                input: serde_json::json!({}),
                task_id: None,
            }
        };

        tracing::debug!(
            target: "noesis::engine",
            session = %self.session_id,
            decision = decision.decision_type,
            action = %decision.action,
            confidence = decision.confidence,
            "cycle decision"
        );

        // Act.
        let result = self.act(&decision.action, &decision.input).await?;

        Ok(CycleOutcome {
            decision_type: decision.decision_type,
            action: decision.action,
            reasoning: decision.reasoning,
            outcome: result.outcome,
            success: result.success,
            task_id: decision.task_id,
            signals: signals.len(),
            interrupts: interrupts_pending,
            recalled,
            phase_error: false,
        })
    }

    /// Dispatches an action: registered tools first, then the built-ins.
    /// Unknown actions produce an error result, never a cycle error.
    async fn act(&self, action: &str, input: &serde_json::Value) -> BrainResult<ActionResult> {
        if let Some(tool) = self.tools.get(action).map(|t| Arc::clone(t.value())) {
            return Ok(match tool.execute(input).await {
                Ok(value) => ActionResult {
                    success: true,
                    outcome: value.to_string(),
                },
                Err(e) => ActionResult {
                    success: false,
                    outcome: format!("tool error: {e}"),
                },
            });
        }

        match action {
            "wait" => Ok(ActionResult {
                success: true,
                outcome: "waited for new work".to_string(),
            }),
            "delegate_to_agent" => {
                let task_id = input
                    .get("task_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                if task_id.is_empty() {
                    return Ok(ActionResult {
                        success: false,
                        outcome: "delegation requested without a task".to_string(),
                    });
                }
                let task = self
                    .store
                    .update_task_status(task_id, TaskStatus::Delegated, None)?;
                let agent = task
                    .agent_assigned
                    .unwrap_or_else(|| "generalist".to_string());
                Ok(ActionResult {
                    success: true,
                    outcome: format!("task {task_id} delegated to {agent}"),
                })
            }
            "web_research" => {
                let query = input
                    .get("description")
                    .and_then(|v| v.as_str())
                    .or_else(|| input.get("content").and_then(|v| v.as_str()))
                    .unwrap_or_default();
                let known = self.memory.search_memories(
                    query,
                    None,
                    RECALL_PER_TASK,
                    self.config.similarity_threshold,
                )?;
                Ok(ActionResult {
                    success: true,
                    outcome: format!(
                        "research surfaced {} stored memories for: {query}",
                        known.len()
                    ),
                })
            }
            "handle_interrupt" => {
                let content = input
                    .get("content")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                Ok(ActionResult {
                    success: true,
                    outcome: format!("interrupt handled: {content}"),
                })
            }
            other => {
                let err = ToolError::UnknownAction(other.to_string());
                tracing::warn!(
                    target: "noesis::engine",
                    session = %self.session_id,
                    action = other,
                    "no tool registered for action"
                );
                Ok(ActionResult {
                    success: false,
                    outcome: format!("error: {err}"),
                })
            }
        }
    }

    fn lock_interrupts(&self) -> MutexGuard<'_, VecDeque<Signal>> {
        self.interrupts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::shared::TaskRecord;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn engine() -> (tempfile::TempDir, Arc<CognitiveEngine>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(BrainStore::open_path(dir.path()).unwrap());
        let memory = Arc::new(MemoryManager::new(
            store.clone(),
            Arc::new(HashEmbedder::new()),
        ));
        let config = BrainConfig::default()
            .with_data_dir(dir.path())
            .with_cycle_delay(Duration::from_millis(10))
            .with_consolidation_interval(100);
        let engine = Arc::new(CognitiveEngine::new("session-test", config, store, memory));
        (dir, engine)
    }

    fn store_of(engine: &CognitiveEngine) -> &Arc<BrainStore> {
        engine.memory.store()
    }

    #[tokio::test]
    async fn empty_queue_cycle_waits() {
        let (_dir, engine) = engine();
        engine.step().await.unwrap();

        let thoughts = store_of(&engine).recent_thoughts(5).unwrap();
        assert_eq!(thoughts.len(), 1);
        assert_eq!(thoughts[0].decision_type, "wait");
        assert_eq!(thoughts[0].action_taken, "wait");

        let wm = store_of(&engine)
            .get_working_memory("session-test")
            .unwrap()
            .unwrap();
        assert_eq!(wm.cognitive_state, CognitiveState::Learning);
    }

    #[tokio::test]
    async fn pending_development_task_is_delegated() {
        let (_dir, engine) = engine();
        let task = TaskRecord::new("implement retry logic", "development", 5);
        let task_id = task.task_id.clone();
        store_of(&engine).add_task(&task).unwrap();

        engine.step().await.unwrap();

        let stored = store_of(&engine).get_task(&task_id).unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Delegated);

        let thoughts = store_of(&engine).recent_thoughts(5).unwrap();
        assert_eq!(thoughts[0].decision_type, "task_execution");
        assert_eq!(thoughts[0].action_taken, "delegate_to_agent");
    }

    #[tokio::test]
    async fn interrupt_preempts_queued_task() {
        let (_dir, engine) = engine();
        let task = TaskRecord::new("routine maintenance", "development", 5);
        let task_id = task.task_id.clone();
        store_of(&engine).add_task(&task).unwrap();
        engine.push_interrupt(Signal {
            source: "operator".to_string(),
            content: "halt current rollout".to_string(),
            priority: 9,
        });

        engine.step().await.unwrap();

        let thoughts = store_of(&engine).recent_thoughts(5).unwrap();
        assert_eq!(thoughts[0].decision_type, "interrupt");
        assert_eq!(thoughts[0].action_taken, "handle_interrupt");
        // The queued task was not touched.
        let stored = store_of(&engine).get_task(&task_id).unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn interrupts_resolve_one_per_cycle_highest_priority_first() {
        let (_dir, engine) = engine();
        engine.push_interrupt(Signal {
            source: "operator".to_string(),
            content: "rotate the leaked credential".to_string(),
            priority: 5,
        });
        engine.push_interrupt(Signal {
            source: "pager".to_string(),
            content: "disk usage critical on db-1".to_string(),
            priority: 9,
        });

        for _ in 0..3 {
            engine.step().await.unwrap();
        }

        // Most recent first: both interrupts were handled, strongest first,
        // and the third cycle found an empty queue.
        let thoughts = store_of(&engine).recent_thoughts(5).unwrap();
        assert_eq!(thoughts[2].action_taken, "handle_interrupt");
        assert!(thoughts[2].outcome.contains("disk usage critical"));
        assert_eq!(thoughts[1].action_taken, "handle_interrupt");
        assert!(thoughts[1].outcome.contains("rotate the leaked credential"));
        assert_eq!(thoughts[0].action_taken, "wait");
    }

    #[tokio::test]
    async fn unmapped_action_is_an_error_result_not_a_crash() {
        let (_dir, engine) = engine();
        let task = TaskRecord::new("inspect latency numbers", "analysis", 5);
        store_of(&engine).add_task(&task).unwrap();

        engine.step().await.unwrap();
        let thoughts = store_of(&engine).recent_thoughts(5).unwrap();
        assert_eq!(thoughts[0].action_taken, "analyze_data");
        assert!(thoughts[0].outcome.contains("no tool registered"));

        // The loop keeps going.
        engine.step().await.unwrap();
        assert_eq!(store_of(&engine).recent_thoughts(5).unwrap().len(), 2);
    }

    struct CountingTool {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl CognitiveTool for CountingTool {
        fn name(&self) -> &str {
            "analyze_data"
        }

        async fn execute(
            &self,
            _input: &serde_json::Value,
        ) -> Result<serde_json::Value, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ToolError::Failed("analyzer backend offline".to_string()))
            } else {
                Ok(serde_json::json!({"analyzed": true}))
            }
        }
    }

    #[tokio::test]
    async fn registered_tool_is_dispatched_by_action_name() {
        let (_dir, engine) = engine();
        let tool = Arc::new(CountingTool {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        engine.register_tool(tool.clone());
        store_of(&engine)
            .add_task(&TaskRecord::new("inspect latency numbers", "analysis", 5))
            .unwrap();

        engine.step().await.unwrap();
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
        let thoughts = store_of(&engine).recent_thoughts(5).unwrap();
        assert!(thoughts[0].outcome.contains("analyzed"));
    }

    #[tokio::test]
    async fn tool_failure_does_not_abort_the_cycle() {
        let (_dir, engine) = engine();
        engine.register_tool(Arc::new(CountingTool {
            calls: AtomicUsize::new(0),
            fail: true,
        }));
        store_of(&engine)
            .add_task(&TaskRecord::new("inspect latency numbers", "analysis", 5))
            .unwrap();

        engine.step().await.unwrap();
        let thoughts = store_of(&engine).recent_thoughts(5).unwrap();
        assert_eq!(thoughts.len(), 1);
        assert!(thoughts[0].outcome.contains("tool error"));

        // The fault left an error memory naming the cycle.
        let errors = store_of(&engine).search_memories(Some("error"), 10).unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].content.contains("Cycle 1"));
    }

    struct OneShotSource {
        fired: AtomicBool,
    }

    #[async_trait]
    impl SignalSource for OneShotSource {
        fn name(&self) -> &str {
            "one_shot"
        }

        async fn poll(&self) -> Vec<Signal> {
            if self.fired.swap(true, Ordering::SeqCst) {
                Vec::new()
            } else {
                vec![Signal {
                    source: "one_shot".to_string(),
                    content: "replication lag spiked on the primary".to_string(),
                    priority: 3,
                }]
            }
        }
    }

    #[tokio::test]
    async fn signals_drive_recall() {
        let (_dir, engine) = engine();
        engine
            .memory
            .store_memory(
                "replication lag spiked on the primary",
                "experience",
                "test",
                0.9,
            )
            .unwrap();
        engine.register_signal_source(Arc::new(OneShotSource {
            fired: AtomicBool::new(false),
        }));

        engine.step().await.unwrap();
        let thoughts = store_of(&engine).recent_thoughts(5).unwrap();
        assert_eq!(thoughts[0].context["signals"], 1);
        assert!(thoughts[0].context["recalled"].as_u64().unwrap() >= 1);
    }

    #[tokio::test]
    async fn exactly_one_thought_per_cycle() {
        let (_dir, engine) = engine();
        store_of(&engine)
            .add_task(&TaskRecord::new("build the feature", "development", 5))
            .unwrap();
        for _ in 0..3 {
            engine.step().await.unwrap();
        }
        assert_eq!(store_of(&engine).recent_thoughts(10).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn loop_runs_and_stops() {
        let (_dir, engine) = engine();
        let handle = engine.clone().start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        engine.stop();
        handle.await.unwrap();

        assert!(!engine.get_status().unwrap().running);
        assert!(!store_of(&engine).recent_thoughts(50).unwrap().is_empty());
    }

    #[tokio::test]
    async fn spawned_loop_polls_registered_sources() {
        let (_dir, engine) = engine();
        engine.register_signal_source(Arc::new(OneShotSource {
            fired: AtomicBool::new(false),
        }));

        let handle = engine.clone().start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        engine.stop();
        handle.await.unwrap();

        let thoughts = store_of(&engine).recent_thoughts(50).unwrap();
        assert!(thoughts.iter().any(|t| t.context["signals"] == 1));
    }

    #[tokio::test]
    async fn pause_and_resume_flags() {
        let (_dir, engine) = engine();
        engine.pause();
        assert!(engine.get_status().unwrap().paused);
        engine.resume();
        assert!(!engine.get_status().unwrap().paused);
    }
}
