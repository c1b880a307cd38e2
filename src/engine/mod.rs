//! Order lifecycle orchestration

pub mod events;
pub mod lifecycle;

pub use events::LifecycleEvent;
pub use lifecycle::{LifecycleEngine, PickResponse, SecretConfirmation};
