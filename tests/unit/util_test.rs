//! Tests for utility functions

use std::time::Duration;

use worker_scheduler::util::{elapsed_since, new_id, now_ms, Priority};

#[test]
fn test_priority_ordering() {
    assert!(Priority::Critical > Priority::Urgent);
    assert!(Priority::Urgent > Priority::High);
    assert!(Priority::High > Priority::Normal);
    assert!(Priority::Normal > Priority::Low);
    assert_eq!(Priority::default(), Priority::Normal);
}

#[test]
fn test_priority_text_forms() {
    assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
    assert!("asap".parse::<Priority>().is_err());
    assert_eq!(serde_json::to_string(&Priority::Urgent).unwrap(), "\"urgent\"");
    let parsed: Priority = serde_json::from_str("\"low\"").unwrap();
    assert_eq!(parsed, Priority::Low);
}

#[test]
fn test_ids_are_unique() {
    let a = new_id();
    let b = new_id();
    assert_ne!(a, b);
    assert_eq!(a.len(), 36);
}

#[test]
fn test_clock() {
    let start = now_ms();
    assert!(start > 0);
    assert_eq!(elapsed_since(start + 10_000), Duration::ZERO);
}
