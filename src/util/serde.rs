//! Shared serializable primitives used across the scheduler.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Unique task identifier (UUID v4 string).
pub type TaskId = String;

/// Unique worker identifier (UUID v4 string).
pub type WorkerId = String;

/// Task priority. Declaration order is the ordering: `Low` is lowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background work.
    Low,
    /// Default priority.
    #[default]
    Normal,
    /// Ahead of normal traffic.
    High,
    /// Time-sensitive work.
    Urgent,
    /// Must run before anything else.
    Critical,
}

impl Priority {
    /// All priorities, lowest first.
    pub const ALL: [Self; 5] = [Self::Low, Self::Normal, Self::High, Self::Urgent, Self::Critical];

    /// Lowercase name used in logs and serialized records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown priority `{other}`")),
        }
    }
}

/// Generate a fresh identifier for tasks and workers.
#[must_use]
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
