//! Process configuration loaded from the environment (§6 Environment/config,
//! §11.3), following the same `once_cell::sync::Lazy` + `dotenvy` loading
//! pattern `flow-store::config` uses for its own `DbConfig`.

use once_cell::sync::Lazy;
use std::env;

static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenvy::dotenv();
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    Local,
    S3,
}

impl StorageType {
    fn from_env_str(s: &str) -> Self {
        match s {
            "s3" => StorageType::S3,
            _ => StorageType::Local,
        }
    }
}

/// The subset of `constants::DEFAULT_*` the operator can override per
/// deployment. Each field's default mirrors `flow_core::constants` exactly;
/// only the environment can push a value away from that default.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub poll_interval_ms: u64,
    pub batch_size: usize,
    pub worker_max_retries: u32,
    pub queue_backend_url: String,
    pub progress_debounce_ms: u64,
    pub stall_threshold_ms: u64,
    pub storage_type: StorageType,
    pub health_bind: String,
    pub health_port: u16,
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Lazy::force(&DOTENV_LOADED);
        Self {
            poll_interval_ms: env_parsed("POLL_INTERVAL_MS", flow_core::constants::DEFAULT_POLL_INTERVAL_MS)
                .clamp(1_000, 60_000),
            batch_size: env_parsed("BATCH_SIZE", flow_core::constants::DEFAULT_BATCH_SIZE),
            worker_max_retries: env_parsed("WORKER_MAX_RETRIES", flow_core::constants::DEFAULT_STEP_ATTEMPTS),
            queue_backend_url: env::var("QUEUE_BACKEND_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            progress_debounce_ms: env_parsed("PROGRESS_DEBOUNCE_MS", flow_core::constants::DEFAULT_PROGRESS_DEBOUNCE_MS),
            stall_threshold_ms: env_parsed("STALL_THRESHOLD_MS", flow_core::constants::DEFAULT_STALL_THRESHOLD_MS),
            storage_type: StorageType::from_env_str(&env::var("STORAGE_TYPE").unwrap_or_else(|_| "local".to_string())),
            health_bind: env::var("HEALTH_BIND").unwrap_or_else(|_| "0.0.0.0".to_string()),
            health_port: env_parsed("HEALTH_PORT", 8080u16),
        }
    }
}

/// Forces early `.env` load for callers (the CLI, the root binary) that
/// want it done before their own env reads.
pub fn init_dotenv() {
    Lazy::force(&DOTENV_LOADED);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_interval_is_clamped_to_spec_range() {
        std::env::set_var("POLL_INTERVAL_MS", "999999");
        let cfg = EngineConfig::from_env();
        assert_eq!(cfg.poll_interval_ms, 60_000);
        std::env::remove_var("POLL_INTERVAL_MS");
    }

    #[test]
    fn storage_type_defaults_to_local() {
        std::env::remove_var("STORAGE_TYPE");
        let cfg = EngineConfig::from_env();
        assert_eq!(cfg.storage_type, StorageType::Local);
    }
}
