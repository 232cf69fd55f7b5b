//! Brain configuration loaded from the environment.
//!
//! | Env | Default | Description |
//! |-----|---------|--------------|
//! | NOESIS_DATA_DIR | ./data/noesis_brain | Sled database directory. |
//! | NOESIS_CYCLE_DELAY_MS | 1000 | Inter-cycle delay (min 10). |
//! | NOESIS_CONSOLIDATION_INTERVAL | 5 | Consolidate memories every N cycles (min 1). |
//! | NOESIS_IDLE_THRESHOLD_SECS | 60 | Inactivity before the engine reports Idle (min 1). |
//! | NOESIS_SIMILARITY_THRESHOLD | 0.7 | Minimum cosine similarity for search hits. |
//! | NOESIS_PROVIDER_TIMEOUT_SECS | 30 | Per-provider decision timeout (min 1). |

use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CYCLE_DELAY_MS: u64 = 1000;
const DEFAULT_CONSOLIDATION_INTERVAL: u64 = 5;
const DEFAULT_IDLE_THRESHOLD_SECS: u64 = 60;
const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.7;
const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 30;

/// Runtime knobs for the brain core. Construct via `Default` (env-aware) or
/// build explicitly for tests.
#[derive(Debug, Clone)]
pub struct BrainConfig {
    /// Directory holding the Sled database.
    pub data_dir: PathBuf,
    /// Fixed delay between cognitive cycles.
    pub cycle_delay: Duration,
    /// Trigger memory consolidation every N cycles.
    pub consolidation_interval: u64,
    /// Inactivity span after which the engine reports Idle.
    pub idle_threshold: Duration,
    /// Minimum cosine similarity for a memory search hit.
    pub similarity_threshold: f32,
    /// Timeout applied to every LLM provider call.
    pub provider_timeout: Duration,
}

impl Default for BrainConfig {
    fn default() -> Self {
        let cycle_delay_ms = env_u64("NOESIS_CYCLE_DELAY_MS", DEFAULT_CYCLE_DELAY_MS).max(10);
        let consolidation =
            env_u64("NOESIS_CONSOLIDATION_INTERVAL", DEFAULT_CONSOLIDATION_INTERVAL).max(1);
        let idle_secs = env_u64("NOESIS_IDLE_THRESHOLD_SECS", DEFAULT_IDLE_THRESHOLD_SECS).max(1);
        let provider_secs =
            env_u64("NOESIS_PROVIDER_TIMEOUT_SECS", DEFAULT_PROVIDER_TIMEOUT_SECS).max(1);

        let similarity = std::env::var("NOESIS_SIMILARITY_THRESHOLD")
            .ok()
            .and_then(|s| s.parse::<f32>().ok())
            .unwrap_or(DEFAULT_SIMILARITY_THRESHOLD)
            .clamp(0.0, 1.0);

        let data_dir = std::env::var("NOESIS_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/noesis_brain"));

        Self {
            data_dir,
            cycle_delay: Duration::from_millis(cycle_delay_ms),
            consolidation_interval: consolidation,
            idle_threshold: Duration::from_secs(idle_secs),
            similarity_threshold: similarity,
            provider_timeout: Duration::from_secs(provider_secs),
        }
    }
}

impl BrainConfig {
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_cycle_delay(mut self, delay: Duration) -> Self {
        self.cycle_delay = delay.max(Duration::from_millis(10));
        self
    }

    pub fn with_consolidation_interval(mut self, every_n_cycles: u64) -> Self {
        self.consolidation_interval = every_n_cycles.max(1);
        self
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(default)
}
