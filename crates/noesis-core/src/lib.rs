//! noesis-core: persistent brain for an autonomous agent (transactional
//! store, semantic memory, knowledge graph, decision engine, cognitive loop).
//!
//! Everything persists through the Sled-backed [`BrainStore`]; the layers
//! above it (memory manager, graph reasoner, cognitive engine, orchestrator)
//! hold only read-through caches and can be rebuilt from storage at any time.

mod config;
mod decision;
mod embedding;
mod engine;
mod error;
mod graph;
mod memory;
mod orchestrator;
mod shared;
mod store;

// Configuration and errors
pub use config::BrainConfig;
pub use error::{BrainError, BrainResult, ProviderError, ToolError};

// Persisted record types
pub use shared::{
    now_epoch_ms, AgentPerformance, CognitiveState, KnowledgeEdge, MemoryRecord, TaskRecord,
    TaskStatus, ThoughtRecord, WorkingMemoryState,
};

// Storage layer
pub use store::{BrainStats, BrainStore};

// Embeddings and semantic memory
pub use embedding::{cosine_similarity, Embedder, HashEmbedder, EMBEDDING_DIM};
pub use memory::{ConsolidationReport, MemoryManager, MemoryMatch};

// Knowledge graph reasoning
pub use graph::{ConnectionPath, GraphReasoner, InferredRelationship, DEFAULT_MAX_PATH_LENGTH};

// Decision engine
pub use decision::{
    DecisionContext, DecisionEngine, DecisionResult, GenerationOptions, GenerationResponse,
    LLMProvider, ProviderPerformance, ReasoningMode, TokenUsage,
};

// Cognitive loop
pub use engine::{CognitiveEngine, CognitiveTool, EngineStatus, Signal, SignalSource};

// Orchestration
pub use orchestrator::{Orchestrator, OrchestratorStatus, TaskDelegator};
