use crate::db::{DbPool, OrmConn};

/// Shared per-process handles, cloned into every request by axum.
#[derive(Clone)]
pub struct AppState {
    /// Raw sqlx pool for audit writes and readiness probes.
    pub pool: DbPool,
    /// SeaORM connection for domain reads and transactions.
    pub orm: OrmConn,
}
