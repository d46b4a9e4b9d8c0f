//! flow-store: the Postgres-backed `TaskStore` (§6, §11.3).
//!
//! Modules:
//! - `pg`: the Diesel + r2d2 implementation of `flow_core::store::TaskStore`.
//! - `migrations`: embedded Diesel migration runner.
//! - `config`: `.env`/environment configuration loading.
//! - `schema`: hand-written Diesel table declarations.

pub mod config;
pub mod error;
pub mod migrations;
pub mod pg;
pub mod schema;

pub use config::init_dotenv;
pub use error::PersistenceError;
pub use pg::{build_dev_pool_from_env, task_store_from_env, ConnectionProvider, PgPool, PgTaskStore, PoolProvider};
