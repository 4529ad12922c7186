//! A missing libruby must leave every load a no-op
//!
//! Uses the process-wide handle, so this file holds a single test.

mod common;

use common::capture_logs;
use factbridge_host::{FactCollection, FactValue, RuntimeConfig, RuntimeState};
use std::path::PathBuf;

#[test]
fn test_runtime_missing() {
    let config = RuntimeConfig::default()
        .with_library("/nonexistent/libruby.so")
        .without_environment()
        .without_probe();

    let (initialized, logs) =
        capture_logs(|| factbridge_host::initialize_with_config(&config, false));
    assert!(!initialized);
    assert!(
        logs.contains("facts requiring Ruby will not be resolved."),
        "logs: {}",
        logs
    );
    assert!(logs.contains("/nonexistent/libruby.so"), "logs: {}", logs);
    let warnings: Vec<&str> = logs.lines().filter(|line| line.contains("WARN")).collect();
    assert_eq!(warnings.len(), 1, "logs: {}", logs);
    assert!(warnings[0].contains("/nonexistent/libruby.so"), "logs: {}", logs);

    let mut facts = FactCollection::new();
    facts.add("kernel", FactValue::from("Linux"));
    let before = facts.clone();

    factbridge_host::load_custom_facts(&mut facts, [PathBuf::from("/x")]);
    factbridge_host::load_custom_facts_with_framework(&mut facts, true, [PathBuf::from("/x")]);
    factbridge_host::load_custom_facts_with_options(&mut facts, true, true, [PathBuf::from("/x")]);

    assert_eq!(facts.len(), before.len());
    assert_eq!(facts.get("kernel"), before.get("kernel"));

    let handle = factbridge_host::RuntimeHandle::instance().expect("handle is free");
    assert_eq!(handle.state(), RuntimeState::Uninitialized);
    drop(handle);

    // Never initialized, so teardown leaves the state alone.
    factbridge_host::uninitialize();
    let handle = factbridge_host::RuntimeHandle::instance().expect("handle is free");
    assert_eq!(handle.state(), RuntimeState::Uninitialized);
}
