pub mod publisher;
pub mod types;

// Re-export key types for convenience
pub use publisher::{spawn_sink, EventPublisher, EventPublisherConfig, EventPublisherStats};
pub use types::{OrchestrationEvent, StateChange};
