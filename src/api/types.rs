//! Shared state for the HTTP layer.

use std::sync::Arc;

use crate::db::Database;
use crate::pipeline::scheduler::Scheduler;
use crate::pipeline::service::RunDefaults;

/// Shared context for all API routes. Cheap to clone.
#[derive(Clone)]
pub struct ApiContext {
    pub db: Arc<Database>,
    pub scheduler: Arc<Scheduler>,
    pub run_defaults: Arc<RunDefaults>,
}

impl ApiContext {
    pub fn new(db: Arc<Database>, scheduler: Arc<Scheduler>, run_defaults: RunDefaults) -> Self {
        Self {
            db,
            scheduler,
            run_defaults: Arc::new(run_defaults),
        }
    }
}
