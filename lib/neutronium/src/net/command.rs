//! Command host: dispatches named, cancellable commands and tracks a captured-error count
//! across the run, grounded on `commandHost.cpp`/`launcherPlatformCommon.cpp`'s exit-code
//! accounting. `game::runner` is the thin CLI wrapper that turns the process's argv into a
//! command name plus arguments and reports the resulting [`ExecutionReport`] as an exit code.
//!
//! Each command runs on its own background thread — the fiber the original launcher ran
//! commands on — and is polled non-blockingly through [`CommandRun::update`], or waited out
//! synchronously by [`CommandHost::run`] for callers that have nothing better to do in the
//! meantime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Shared flag a long-running command polls to find out whether it should wind down early.
#[derive(Clone)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> CancellationToken {
        CancellationToken(Arc::new(AtomicBool::new(false)))
    }

    #[inline]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        CancellationToken::new()
    }
}

type CommandFn = dyn Fn(&[String], &CancellationToken) -> Result<(), String> + Send + Sync;

#[derive(Debug)]
pub struct ExecutionReport {
    pub command: String,
    pub succeeded: bool,
    pub errors_captured: u32,
    pub message: Option<String>,
}

impl ExecutionReport {
    /// Process exit code for this run: `0` on success, `1` otherwise, matching the
    /// convention the original launcher used.
    pub fn exit_code(&self) -> i32 {
        if self.succeeded {
            0
        } else {
            1
        }
    }
}

/// A single dispatch of a command onto its background thread. Polled non-blockingly through
/// `update()`; if dropped before finishing, cancels the command and waits for its fence
/// before releasing it, so a `CommandRun` never outlives the thread backing it.
pub struct CommandRun {
    cancel: CancellationToken,
    fence: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
    report: Arc<Mutex<Option<ExecutionReport>>>,
}

impl CommandRun {
    /// Requests cancellation; observed by the command the next time it checks
    /// `cancel.is_cancelled()`. Does not wait for the command to actually stop.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Non-blocking. Returns `true` while the command is still running. Once its fence has
    /// been signalled, joins the (already-finished, so this cannot block) worker thread,
    /// releases it, and returns `false` — the caller should collect the result with
    /// `take_report()` once this happens.
    pub fn update(&mut self) -> bool {
        if !self.fence.load(Ordering::Acquire) {
            return true;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        false
    }

    /// Takes the finished report, if `update()` has already returned `false`. Returns `None`
    /// while the command is still running, or if the report was already taken.
    pub fn take_report(&self) -> Option<ExecutionReport> {
        self.report.lock().expect("command report mutex poisoned").take()
    }
}

impl Drop for CommandRun {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Registry of named commands the launcher can dispatch to.
#[derive(Default)]
pub struct CommandHost {
    commands: HashMap<String, Arc<CommandFn>>,
    errors_captured: Arc<AtomicU32>,
}

impl CommandHost {
    pub fn new() -> CommandHost {
        CommandHost::default()
    }

    pub fn register<F>(&mut self, name: &str, command: F)
    where
        F: Fn(&[String], &CancellationToken) -> Result<(), String> + Send + Sync + 'static,
    {
        self.commands.insert(name.to_string(), Arc::new(command));
    }

    /// Looks up `name` and starts it on a background thread, returning a handle the caller
    /// polls non-blockingly via `CommandRun::update`. An unknown command name still returns a
    /// `CommandRun` — its worker thread immediately finishes with a failing report — so
    /// callers don't need a separate lookup-failure path ahead of the polling loop.
    pub fn start(&self, name: &str, args: Vec<String>, cancel: CancellationToken) -> CommandRun {
        let fence = Arc::new(AtomicBool::new(false));
        let report = Arc::new(Mutex::new(None));

        let command = self.commands.get(name).cloned();
        let errors_captured = self.errors_captured.clone();
        let owned_name = name.to_string();

        let worker_fence = fence.clone();
        let worker_report = report.clone();
        let worker_cancel = cancel.clone();

        let handle = thread::Builder::new()
            .name(format!("command-{}", owned_name))
            .spawn(move || {
                let execution_report = match &command {
                    Some(command) => match command(&args, &worker_cancel) {
                        Ok(()) => ExecutionReport {
                            command: owned_name.clone(),
                            succeeded: true,
                            errors_captured: errors_captured.load(Ordering::Relaxed),
                            message: None,
                        },
                        Err(message) => {
                            let total = errors_captured.fetch_add(1, Ordering::Relaxed) + 1;
                            ExecutionReport {
                                command: owned_name.clone(),
                                succeeded: false,
                                errors_captured: total,
                                message: Some(message),
                            }
                        }
                    },
                    None => ExecutionReport {
                        command: owned_name.clone(),
                        succeeded: false,
                        errors_captured: errors_captured.load(Ordering::Relaxed),
                        message: Some(format!("unknown command '{}'", owned_name)),
                    },
                };

                *worker_report.lock().expect("command report mutex poisoned") = Some(execution_report);
                worker_fence.store(true, Ordering::Release);
            })
            .expect("failed spawning command worker thread");

        CommandRun {
            cancel,
            fence,
            handle: Some(handle),
            report,
        }
    }

    /// Blocking convenience over `start`/`update`, for callers (the CLI launcher) that have
    /// nothing else to do while the command runs.
    pub fn run(&self, name: &str, args: &[String], cancel: &CancellationToken) -> ExecutionReport {
        let mut run = self.start(name, args.to_vec(), cancel.clone());
        while run.update() {
            thread::sleep(Duration::from_millis(5));
        }
        run.take_report().expect("command run finished without producing a report")
    }

    pub fn command_names(&self) -> Vec<&str> {
        self.commands.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_successful_command_reports_zero_exit_code() {
        let mut host = CommandHost::new();
        host.register("ping", |_args, _cancel| Ok(()));

        let report = host.run("ping", &[], &CancellationToken::new());
        assert!(report.succeeded);
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_failing_command_increments_captured_errors() {
        let mut host = CommandHost::new();
        host.register("boom", |_args, _cancel| Err("kaboom".to_string()));

        let first = host.run("boom", &[], &CancellationToken::new());
        assert_eq!(first.errors_captured, 1);
        assert_eq!(first.exit_code(), 1);

        let second = host.run("boom", &[], &CancellationToken::new());
        assert_eq!(second.errors_captured, 2);
    }

    #[test]
    fn test_unknown_command_fails_without_panicking() {
        let host = CommandHost::new();
        let report = host.run("nope", &[], &CancellationToken::new());
        assert!(!report.succeeded);
        assert!(report.message.unwrap().contains("nope"));
    }

    #[test]
    fn test_command_observes_cancellation() {
        let mut host = CommandHost::new();
        host.register("loop", |_args, cancel| {
            if cancel.is_cancelled() {
                Err("cancelled".to_string())
            } else {
                Ok(())
            }
        });

        let token = CancellationToken::new();
        token.cancel();

        let report = host.run("loop", &[], &token);
        assert!(!report.succeeded);
    }

    #[test]
    fn test_update_reports_running_then_finished() {
        use std::sync::atomic::AtomicBool as StdAtomicBool;

        let release = Arc::new(StdAtomicBool::new(false));
        let worker_release = release.clone();

        let mut host = CommandHost::new();
        host.register("slow", move |_args, _cancel| {
            while !worker_release.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(2));
            }
            Ok(())
        });

        let mut run = host.start("slow", vec![], CancellationToken::new());
        assert!(run.update());
        assert!(run.take_report().is_none());

        release.store(true, Ordering::Relaxed);
        while run.update() {
            thread::sleep(Duration::from_millis(2));
        }

        let report = run.take_report().unwrap();
        assert!(report.succeeded);
    }

    #[test]
    fn test_dropping_run_cancels_and_joins() {
        let started = Arc::new(AtomicBool::new(false));
        let worker_started = started.clone();

        let mut host = CommandHost::new();
        host.register("cancellable", move |_args, cancel| {
            worker_started.store(true, Ordering::Relaxed);
            while !cancel.is_cancelled() {
                thread::sleep(Duration::from_millis(2));
            }
            Err("cancelled".to_string())
        });

        let run = host.start("cancellable", vec![], CancellationToken::new());
        while !started.load(Ordering::Relaxed) {
            thread::sleep(Duration::from_millis(2));
        }

        // Dropping mid-run must cancel the worker and block here until it has actually
        // stopped, never leaking a thread past the handle's lifetime.
        drop(run);
    }
}
