//! Ruby is only driven from the thread that initialized it
//!
//! Uses the process-wide handle, so this file holds a single test.

mod common;

use common::capture_logs;
use factbridge_host::testing::SimulatedRuntime;
use factbridge_host::{FactCollection, FactValue, Runtime, RuntimeHandle, RuntimeState};
use std::thread;

#[test]
fn test_other_threads_cannot_drive_ruby() {
    let runtime = SimulatedRuntime::new();
    let list = runtime.array(vec![runtime.integer(1), runtime.integer(2)]);
    {
        let mut handle = RuntimeHandle::instance().expect("handle is free");
        assert!(handle.initialize_with(move || Ok(Box::new(runtime) as Box<dyn Runtime>), false));
    }

    let mut facts = FactCollection::new();
    facts.add("list", FactValue::foreign(list));
    assert!(factbridge_host::query(&facts, "list.1").is_some());

    let worker = thread::spawn(move || {
        capture_logs(|| {
            let handle = RuntimeHandle::instance().expect("handle is free");
            let driven = handle.runtime().is_some();
            drop(handle);

            let uncached = factbridge_host::query(&facts, "list.0");
            let before = facts.len();
            let external = factbridge_host::load_custom_facts(&mut facts, ["/facts"]);
            factbridge_host::uninitialize();
            (driven, uncached.is_none(), external.is_empty() && facts.len() == before)
        })
    });
    let ((driven, uncached_refused, load_skipped), logs) = worker.join().unwrap();

    assert!(!driven);
    assert!(uncached_refused);
    assert!(load_skipped);
    assert!(
        logs.contains("ruby was initialized on another thread"),
        "logs: {}",
        logs
    );

    let handle = RuntimeHandle::instance().expect("handle is free");
    assert_eq!(handle.state(), RuntimeState::Initialized);
    assert!(handle.runtime().is_some());
    drop(handle);

    factbridge_host::uninitialize();
    let handle = RuntimeHandle::instance().expect("handle is free");
    assert_eq!(handle.state(), RuntimeState::TornDown);
}
