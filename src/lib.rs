//! cyfire coordinates the processes an end-to-end test run depends on. It starts a dev server or
//! the Firebase emulators (or reuses ones already running), waits until they answer, runs Cypress
//! against them, and tears everything down again, including on interrupt.

/// Cached companion metadata.
pub mod cache;

/// CLI interface.
pub mod cli;

/// Workspace and executor option loading.
pub mod config;

/// The reuse/start/wait/run/cleanup state machine.
pub mod coordinator;

/// Endpoints and reachability probes.
pub mod endpoint;

/// Error handling.
pub mod error;

/// The `run`, `e2e-ci`, `open`, `serve` and `emulators` executors.
pub mod executors;

/// Port lock files for automatically selected ports.
pub mod lock;

/// Output pumping for supervised processes.
pub mod logs;

/// Spawning and tree-terminating companion processes.
pub mod process;

/// Polling until a companion is ready.
pub mod readiness;

/// Freeing ports held by leftover processes.
pub mod reclaim;

/// Cleanup hooks run on interrupt.
pub mod registry;

/// Companion discovery through project dependencies.
pub mod resolver;

/// Driving the Cypress CLI.
pub mod runner;

/// `project:target[:configuration]` strings.
pub mod target;
