pub mod entities;
pub mod ports;
pub mod repositories;
pub mod services;
pub mod value_objects;

pub use entities::*;
pub use orchestrator_errors::{OrchestratorError, OrchestratorResult};
pub use ports::*;
pub use repositories::*;
pub use services::*;
pub use value_objects::*;
