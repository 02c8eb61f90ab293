//! HTTP surface over the processing service.
//!
//! Routes are nested under `/api/` and share an [`ApiContext`] holding the
//! database, the run scheduler and the model defaults stamped onto new runs.

pub mod endpoints;
pub mod error;
pub mod router;
pub mod server;
pub mod types;

pub use router::build_router;
pub use server::{start_api_server, ApiServer};
pub use types::ApiContext;
