//! Ruby stdout redirection
//!
//! Custom facts occasionally print to stdout while loading or resolving.
//! The host's stdout carries structured output (JSON/YAML), so for the
//! lifetime of a [`StdoutRedirect`] Ruby's `$stdout` points at `$stderr`.

use crate::error::RuntimeError;
use crate::runtime::Runtime;
use factbridge_api::ForeignValue;

/// Rebinds `$stdout` to `$stderr` until dropped.
///
/// The previous `$stdout` is restored on drop, including when the scope is
/// left by an early return or a panic. Not reentrant.
pub struct StdoutRedirect<'a> {
    runtime: &'a dyn Runtime,
    saved: ForeignValue,
}

impl<'a> StdoutRedirect<'a> {
    pub fn new(runtime: &'a dyn Runtime) -> Result<Self, RuntimeError> {
        tracing::debug!("Redirecting ruby's stdout to stderr");
        let stderr = runtime.global_get("$stderr")?;
        let saved = runtime.global_get("$stdout")?;
        runtime.global_set("$stdout", stderr)?;
        Ok(Self { runtime, saved })
    }
}

impl Drop for StdoutRedirect<'_> {
    fn drop(&mut self) {
        tracing::debug!("Restoring ruby's stdout");
        if let Err(e) = self.runtime.global_set("$stdout", self.saved) {
            tracing::warn!(error = %e, "could not restore ruby's stdout");
        }
    }
}

/// Run `f` with Ruby's stdout redirected to stderr.
///
/// If the redirect cannot be established `f` still runs, unredirected.
pub fn with_stdout_redirected<R>(runtime: &dyn Runtime, f: impl FnOnce() -> R) -> R {
    let _guard = match StdoutRedirect::new(runtime) {
        Ok(guard) => Some(guard),
        Err(e) => {
            tracing::warn!(error = %e, "could not redirect ruby's stdout");
            None
        }
    };
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SimulatedRuntime;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[test]
    fn test_redirect_points_stdout_at_stderr() {
        let runtime = SimulatedRuntime::new();
        let stdout = runtime.global_get("$stdout").unwrap();
        let stderr = runtime.global_get("$stderr").unwrap();
        assert_ne!(stdout, stderr);

        {
            let _guard = StdoutRedirect::new(&runtime).unwrap();
            assert_eq!(runtime.global_get("$stdout").unwrap(), stderr);
        }
        assert_eq!(runtime.global_get("$stdout").unwrap(), stdout);
    }

    #[test]
    fn test_restores_after_error() {
        let runtime = SimulatedRuntime::new();
        runtime.fail_eval("raise", "custom fact failed");
        let stdout = runtime.global_get("$stdout").unwrap();

        let result = with_stdout_redirected(&runtime, || runtime.eval("raise 'boom'"));

        assert!(result.is_err());
        assert_eq!(runtime.global_get("$stdout").unwrap(), stdout);
    }

    #[test]
    fn test_restores_after_panic() {
        let runtime = SimulatedRuntime::new();
        let stdout = runtime.global_get("$stdout").unwrap();

        let result = catch_unwind(AssertUnwindSafe(|| {
            let _guard = StdoutRedirect::new(&runtime).unwrap();
            panic!("custom fact panicked");
        }));

        assert!(result.is_err());
        assert_eq!(runtime.global_get("$stdout").unwrap(), stdout);
    }

    #[test]
    fn test_unredirected_when_globals_fail() {
        let runtime = SimulatedRuntime::new();
        runtime.fail_global_set("$stdout");
        let stdout = runtime.global_get("$stdout").unwrap();

        let ran = with_stdout_redirected(&runtime, || true);

        assert!(ran);
        assert_eq!(runtime.global_get("$stdout").unwrap(), stdout);
    }
}
