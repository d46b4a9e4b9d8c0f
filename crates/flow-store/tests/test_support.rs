use flow_store::config::DbConfig;
use flow_store::pg::{build_pool, PgPool};
use once_cell::sync::Lazy;

/// Tests that need a real Postgres skip themselves when `DATABASE_URL`
/// isn't set rather than failing the whole suite in environments
/// without a database.
pub static TEST_POOL: Lazy<Option<PgPool>> = Lazy::new(|| {
    if std::env::var("DATABASE_URL").is_err() {
        return None;
    }
    let cfg = DbConfig::from_env();
    match build_pool(&cfg.url, 1, 1) {
        Ok(p) => Some(p),
        Err(e) => {
            eprintln!("could not build test pool: {e}");
            None
        }
    }
});

pub fn with_pool<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&PgPool) -> R,
{
    TEST_POOL.as_ref().map(|p| f(p))
}
