//! In-memory registries owned by the backend
//!
//! Both registries are plain data structures: they never talk to the provider
//! and never notify anybody. Operations report what changed and the backend
//! turns those reports into notifications.

pub mod calls;
pub mod services;

pub use calls::{CallRegistry, PropertyUpdate, RemovedCall};
pub use services::ServiceRegistry;
