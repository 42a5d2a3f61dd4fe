pub mod routes;
mod service;
pub mod state;

pub use service::*;
pub use state::{ProcedureStepState, WorkitemPriority};
