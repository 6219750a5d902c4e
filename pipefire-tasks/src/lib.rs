//! Task runners (C4): the six building blocks a pipeline's task list is
//! assembled from. Each runner is a plain async function rather than a
//! trait object — the executor (C5) already knows, from
//! `TaskDefinition::task_type`, which one to call, so there is no dynamic
//! dispatch to buy here. Runners take their dependencies (database pool,
//! run context) as parameters rather than reaching for globals, replacing
//! the cyclic pipeline/task back-references of the system this is modeled
//! on with a plain top-down call graph (spec.md §9 Design Note).

pub mod archive;
pub mod cleanup;
pub mod encrypt;
pub mod endpoint;
pub mod sftp_clean;
pub mod sftp_get;
pub mod sftp_put;

use sqlx::PgPool;

/// Process-wide dependencies every task runner that touches the ledger or
/// the network needs. Cheap to clone: the pool is itself a handle.
#[derive(Clone)]
pub struct Services {
    pub db: PgPool,
}

impl Services {
    pub fn new(db: PgPool) -> Self {
        Services { db }
    }
}
