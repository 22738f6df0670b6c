//! API surface: request and response models for hosts embedding the
//! scheduler behind their own transport.

pub mod api;

pub use api::{health, Health, SystemStatus, TaskRequest};
