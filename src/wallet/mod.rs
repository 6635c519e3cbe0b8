pub mod sync;
pub mod types;

pub use sync::{SyncOrchestrator, SyncOutcome, SyncRequest};
pub use types::*;
