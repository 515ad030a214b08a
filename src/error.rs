//! Error handling for cyfire.
use std::time::Duration;

use thiserror::Error;

/// Defines all possible errors raised while coordinating a companion process and a task run.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Invalid or contradictory executor configuration. Fatal, never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The companion never became reachable within the readiness deadline.
    #[error(
        "Companion at {endpoint} was not ready within {}s (waited {}ms). Aborting operation",
        timeout.as_secs_f64(),
        elapsed.as_millis()
    )]
    ReadinessTimeout {
        /// Endpoint (URL or marker description) that was being awaited.
        endpoint: String,
        /// The configured readiness deadline.
        timeout: Duration,
        /// Time actually spent waiting.
        elapsed: Duration,
    },

    /// Spawning the companion (or an auxiliary utility) failed.
    #[error("Failed to start `{command}`: {source}")]
    ProcessSpawn {
        /// The command line that failed to launch.
        command: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// The companion process exited before it became ready.
    #[error("Companion `{command}` exited before becoming ready ({status})")]
    CompanionExited {
        /// The command line of the companion.
        command: String,
        /// Human-readable exit status.
        status: String,
    },

    /// Termination or port reclaim failed during the cleanup phase.
    #[error("Cleanup failed: {0}")]
    Cleanup(String),

    /// A target string could not be parsed.
    #[error("Unable to parse target: \"{0}\" to a valid target")]
    TargetParse(String),

    /// The task runner itself could not be driven to completion.
    #[error("Task failed: {0}")]
    TaskFailed(String),

    /// Error reading or accessing a file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error parsing a JSON document.
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Error parsing a YAML document.
    #[error("Invalid YAML format: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Error for poisoned mutex.
    #[error("Mutex is poisoned: {0}")]
    MutexPoisonError(String),
}

impl<T> From<std::sync::PoisonError<T>> for HarnessError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        HarnessError::MutexPoisonError(err.to_string())
    }
}

impl HarnessError {
    /// Shorthand for building a [`HarnessError::Configuration`].
    pub fn config(message: impl Into<String>) -> Self {
        HarnessError::Configuration(message.into())
    }
}

/// Error type for force-freeing a port.
#[derive(Debug, Error)]
pub enum ReclaimError {
    /// The port number was zero.
    #[error("Invalid port number received: {0}")]
    InvalidPort(u16),

    /// The socket-listing utility could not be executed.
    #[error("Failed to run `{program}`: {source}")]
    Utility {
        /// Program that failed to launch.
        program: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// A process bound to the port could not be killed.
    #[error("Failed to kill PID {pid} bound to port {port}: {reason}")]
    KillFailed {
        /// PID that survived.
        pid: u32,
        /// Port it was bound to.
        port: u16,
        /// Reason reported by the platform.
        reason: String,
    },
}

/// Error type for port lock files.
#[derive(Debug, Error)]
pub enum LockError {
    /// Error creating, locking or removing the lock file.
    #[error("Port lock I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Every candidate port was reserved or bound.
    #[error("No free port found in {start}..={end}")]
    Exhausted {
        /// First candidate port.
        start: u16,
        /// Last candidate port.
        end: u16,
    },
}

impl From<ReclaimError> for HarnessError {
    fn from(err: ReclaimError) -> Self {
        HarnessError::Cleanup(err.to_string())
    }
}

impl From<LockError> for HarnessError {
    fn from(err: LockError) -> Self {
        HarnessError::Configuration(err.to_string())
    }
}
