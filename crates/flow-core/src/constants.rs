//! Engine-wide defaults. Values here are process defaults; `flow-infra`'s
//! config loader overrides them from the environment (see
//! `flow_infra::config::EngineConfig`).

/// Logical engine version, folded into internal fingerprints so a version
/// bump can invalidate replay state without a data migration.
pub const ENGINE_VERSION: &str = "1.0";

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_BATCH_SIZE: usize = 25;
pub const DEFAULT_STEP_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_DELAY_MS: u64 = 30_000;
pub const DEFAULT_PROGRESS_DEBOUNCE_MS: u64 = 250;
pub const DEFAULT_STALL_THRESHOLD_MS: u64 = 5 * 60 * 1_000;
pub const TASK_MIRROR_MAX_RETRY_ATTEMPTS: u32 = 3;
pub const TASK_MIRROR_MAX_RETRY_DELAY_MS: u64 = 2_000;
