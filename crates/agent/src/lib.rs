pub mod mock;
pub mod phase;
pub mod runtime;

pub use mock::MockRunner;
pub use phase::{Phase, TaskConfig};
pub use runtime::Orchestrator;
