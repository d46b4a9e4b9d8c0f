//! `media-flow`: the process that wires `flow-core`'s engine components
//! to the real `flow-redis` queue and `flow-store` task store and runs
//! them as one long-lived service (the enqueuer, one worker per queue,
//! the parent orchestrator, and the `flow-infra` health endpoint).
//!
//! All engine logic lives in the `flow-*` crates; this crate is wiring
//! only. See `src/main.rs`.
