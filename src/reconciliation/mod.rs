pub mod engine;
pub mod pipeline;
pub mod poller;
pub mod registry;

pub use engine::{EscrowOrder, ReconciliationEngine};
pub use pipeline::ReleasePipeline;
pub use poller::EscrowPoller;
pub use registry::{PendingOrderRegistry, RegistryStats};
