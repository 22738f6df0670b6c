//! Infrastructure adapters: the pending-task queue and the storage backends.

pub mod queue;
pub mod store;

pub use queue::{QueueFull, TaskQueue};
pub use store::{InMemoryTaskStore, TaskStore};
