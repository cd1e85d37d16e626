pub mod engine;
pub mod messaging;
pub mod store;

pub use engine::*;
pub use messaging::*;
pub use store::*;
