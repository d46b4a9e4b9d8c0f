//! flow-infra: process configuration (§6 Environment/config, §11.3) and
//! the operator health HTTP endpoint (§4.9, §6 Operator surface).

pub mod config;
pub mod health_server;

pub use config::{init_dotenv, EngineConfig, StorageType};
