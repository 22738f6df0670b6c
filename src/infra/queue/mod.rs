//! Queue backends.

pub mod memory;

pub use memory::{QueueFull, TaskQueue};
