//! Process-wide cleanup hooks run when the invocation is interrupted.
use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use tracing::{debug, warn};

use crate::error::HarnessError;

/// Exit code used after an interrupt, mirroring a shell's `128 + SIGINT`.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

type Hook = Box<dyn FnOnce() + Send>;

/// Owns every cleanup hook of the process and the single signal handler that runs them.
///
/// Construct once in `main` and pass by reference; coordinators register a hook for each
/// companion they start and drop the returned guard once the companion is cleaned up normally.
#[derive(Default)]
pub struct LifecycleRegistry {
    hooks: Mutex<BTreeMap<u64, Hook>>,
    next_id: AtomicU64,
    handler_installed: AtomicBool,
}

impl LifecycleRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Installs the SIGINT/SIGTERM/SIGHUP handler. Later calls are no-ops.
    pub fn install_signal_handler(self: &Arc<Self>) -> Result<(), HarnessError> {
        if self.handler_installed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let registry = Arc::clone(self);
        ctrlc::set_handler(move || {
            eprintln!("cyfire is shutting down... stopping companion processes");
            registry.run_all();
            std::process::exit(INTERRUPTED_EXIT_CODE);
        })
        .map_err(|err| {
            self.handler_installed.store(false, Ordering::SeqCst);
            HarnessError::config(format!("failed to install signal handler: {err}"))
        })
    }

    /// Registers `hook`; it runs on interrupt unless the guard is dropped first.
    pub fn register<F>(&self, hook: F) -> CleanupGuard<'_>
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        match self.hooks.lock() {
            Ok(mut hooks) => {
                hooks.insert(id, Box::new(hook));
            }
            Err(err) => warn!("Cleanup hook registry is poisoned: {err}"),
        }
        debug!("Registered cleanup hook {id}");
        CleanupGuard { registry: self, id }
    }

    /// Number of pending hooks.
    pub fn pending(&self) -> usize {
        self.hooks.lock().map(|hooks| hooks.len()).unwrap_or_default()
    }

    /// Runs and removes every pending hook, newest first.
    pub fn run_all(&self) {
        let drained: Vec<(u64, Hook)> = match self.hooks.lock() {
            Ok(mut hooks) => std::mem::take(&mut *hooks).into_iter().rev().collect(),
            Err(err) => {
                warn!("Cleanup hook registry is poisoned: {err}");
                return;
            }
        };
        for (id, hook) in drained {
            debug!("Running cleanup hook {id}");
            hook();
        }
    }

    fn deregister(&self, id: u64) {
        if let Ok(mut hooks) = self.hooks.lock() {
            hooks.remove(&id);
        }
    }
}

/// Removes its hook from the registry when dropped.
pub struct CleanupGuard<'a> {
    registry: &'a LifecycleRegistry,
    id: u64,
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}
