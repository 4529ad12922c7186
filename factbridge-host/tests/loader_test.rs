//! Integration tests for custom fact loading against a simulated runtime

mod common;

use common::capture_logs;
use factbridge_host::loader::{load_with, LoadOptions};
use factbridge_host::testing::{calls, CallLog, ModuleCall, RecordingModule, SimulatedRuntime};
use factbridge_host::{FactCollection, FactModule, FactValue, ForeignValue, Runtime, RubyFactModule};
use std::cell::Cell;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use tempfile::TempDir;

/// A module whose custom fact raises while resolving
struct RaisingModule<'a> {
    runtime: &'a dyn Runtime,
    observed: Rc<Cell<Option<ForeignValue>>>,
}

impl FactModule for RaisingModule<'_> {
    fn search(&mut self, _paths: &[PathBuf]) {}

    fn resolve_facts(&mut self) {
        self.observed.set(self.runtime.global_get("$stdout").ok());
        if let Err(e) = self.runtime.eval("raise 'custom fact failed'") {
            tracing::warn!("error while resolving custom fact: {}", e);
        }
    }
}

#[test]
fn test_stdout_restored_when_resolution_raises() {
    let runtime = SimulatedRuntime::new();
    runtime.fail_eval("raise", "custom fact failed");
    let stdout = runtime.global_get("$stdout").unwrap();
    let stderr = runtime.global_get("$stderr").unwrap();
    let mut facts = FactCollection::new();
    let observed = Rc::new(Cell::new(None));

    let shared = Rc::clone(&observed);
    let (_, logs) = capture_logs(|| {
        load_with(
            &runtime,
            &mut facts,
            LoadOptions::new(false, true),
            &[],
            move |runtime, _facts, _managed| {
                Ok(RaisingModule {
                    runtime,
                    observed: shared,
                })
            },
        )
    });

    assert_eq!(observed.get(), Some(stderr));
    assert_eq!(runtime.global_get("$stdout").unwrap(), stdout);
    assert!(logs.contains("custom fact failed"), "logs: {}", logs);
}

#[test]
fn test_redirect_is_active_during_resolution() {
    let runtime = SimulatedRuntime::new();
    let stderr = runtime.global_get("$stderr").unwrap();
    let stdout = runtime.global_get("$stdout").unwrap();
    let mut facts = FactCollection::new();
    let log = CallLog::default();

    let module_log = log.clone();
    load_with(
        &runtime,
        &mut facts,
        LoadOptions::new(false, true),
        &[PathBuf::from("/facts")],
        move |runtime, facts, managed| Ok(RecordingModule::new(runtime, facts, managed, module_log)),
    );

    assert!(calls(&log).contains(&ModuleCall::Resolve {
        stdout: Some(stderr)
    }));
    assert_eq!(runtime.global_get("$stdout").unwrap(), stdout);
}

#[test]
fn test_framework_failure_is_tolerated() {
    let runtime = SimulatedRuntime::new();
    runtime.fail_eval("require 'puppet'", "cannot load such file -- puppet");
    let mut facts = FactCollection::new();
    let log = CallLog::default();

    let module_log = log.clone();
    let (_, logs) = capture_logs(|| {
        load_with(
            &runtime,
            &mut facts,
            LoadOptions::new(true, false),
            &[PathBuf::from("/facts.d")],
            move |runtime, facts, managed| {
                Ok(RecordingModule::new(runtime, facts, managed, module_log)
                    .producing(vec![("custom".to_string(), FactValue::from("value"))]))
            },
        )
    });

    assert!(
        logs.contains(
            "Could not load the configuration framework; some facts may be unavailable: cannot load such file -- puppet"
        ),
        "logs: {}",
        logs
    );
    assert!(logs.contains("WARN"));
    assert!(calls(&log).contains(&ModuleCall::Search(vec![PathBuf::from("/facts.d")])));
    assert!(facts.contains("custom"));
}

#[test]
fn test_ruby_module_loads_directory() {
    let temp = TempDir::new().unwrap();
    fs::write(
        temp.path().join("role.rb"),
        "Facter.add(:role) { setcode { 'web' } }",
    )
    .unwrap();
    fs::write(temp.path().join("notes.txt"), "ignored").unwrap();

    let runtime = SimulatedRuntime::new();
    let name = runtime.string("role");
    let names = runtime.array(vec![name]);
    let web = runtime.string("web");
    runtime.on_eval("FactBridge.fact_names", names);
    runtime.on_eval("FactBridge.resolve", web);
    let facts_d = runtime.string("/etc/puppetlabs/facter/facts.d");
    let external = runtime.array(vec![facts_d]);
    runtime.on_eval("FactBridge.external_paths", external);

    let mut facts = FactCollection::new();
    facts.add("kernel", FactValue::from("Linux"));

    let external = load_with(
        &runtime,
        &mut facts,
        LoadOptions::new(false, true),
        &[temp.path().to_path_buf()],
        RubyFactModule::new,
    );

    let loads: Vec<_> = runtime
        .evaluated()
        .into_iter()
        .filter(|source| source.starts_with("FactBridge.load_file"))
        .collect();
    assert_eq!(loads.len(), 1);

    let role = facts.get("role").and_then(FactValue::as_foreign).expect("role fact");
    assert_eq!(role.value(), web);
    assert_eq!(facts.get("kernel").and_then(FactValue::as_str), Some("Linux"));
    assert_eq!(external, vec![PathBuf::from("/etc/puppetlabs/facter/facts.d")]);
}
