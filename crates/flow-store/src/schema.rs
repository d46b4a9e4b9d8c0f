//! Diesel schema, hand-written (replaceable with `diesel print-schema`
//! once the migrations below have run against a real database).
//!
//! Tables:
//! - `tasks`: the task submission boundary (§6) — one row per externally
//!   submitted task, read and updated by the engine via `TaskStore`.
//! - `task_mirror_log`: append-only audit trail of progress writes,
//!   mirroring the event-log shape the engine itself uses internally.

diesel::table! {
    tasks (id) {
        id -> Text,
        workspace_id -> Text,
        kind -> Text,
        status -> Text,
        payload -> Jsonb,
        result -> Nullable<Jsonb>,
        progress -> Double,
        error_log -> Nullable<Text>,
        parent_job_id -> Nullable<Text>,
        created_at -> Timestamptz,
        started_at -> Nullable<Timestamptz>,
        completed_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    task_mirror_log (id) {
        id -> BigInt,
        task_id -> Text,
        progress -> Double,
        ts -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(tasks, task_mirror_log,);
