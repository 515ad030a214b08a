//! Port lock files that keep concurrent invocations from claiming the same auto-selected port.
use std::{
    fs::{self, File, OpenOptions},
    io::{ErrorKind, Write},
    net::TcpListener,
    path::{Path, PathBuf},
};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::error::LockError;

/// First candidate for `cypress-auto` port selection.
pub const AUTO_PORT_START: u16 = 4200;

/// Last candidate for `cypress-auto` port selection.
pub const AUTO_PORT_END: u16 = 4999;

/// Scratch directory holding `<port>.lock` files.
pub fn default_lock_dir() -> PathBuf {
    std::env::temp_dir().join("cyfire").join("ports")
}

/// A reserved port. The lock file exists for as long as this value lives.
#[derive(Debug)]
pub struct PortLock {
    port: u16,
    path: PathBuf,
    file: Option<File>,
}

impl PortLock {
    /// Reserves `port` in `dir`. Returns `Ok(None)` when another invocation holds it.
    pub fn acquire(dir: &Path, port: u16) -> Result<Option<Self>, LockError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{port}.lock"));

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        if file.try_lock_exclusive().is_err() {
            return Ok(None);
        }
        writeln!(file, "{}", std::process::id())?;
        debug!("Reserved port {port} via {}", path.display());

        Ok(Some(Self {
            port,
            path,
            file: Some(file),
        }))
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the lock file.
    pub fn release(mut self) -> Result<(), LockError> {
        self.remove()
    }

    fn remove(&mut self) -> Result<(), LockError> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        let _ = FileExt::unlock(&file);
        drop(file);
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

impl Drop for PortLock {
    fn drop(&mut self) {
        if let Err(err) = self.remove() {
            warn!("Failed to remove {}: {err}", self.path.display());
        }
    }
}

/// Claims the first port in `start..=end` that has no lock file and can be bound on loopback.
pub fn claim_free_port(dir: &Path, start: u16, end: u16) -> Result<PortLock, LockError> {
    for port in start..=end {
        let Some(lock) = PortLock::acquire(dir, port)? else {
            debug!("Port {port} is reserved by another invocation");
            continue;
        };
        if TcpListener::bind(("127.0.0.1", port)).is_ok() {
            return Ok(lock);
        }
        debug!("Port {port} is bound by another process");
        lock.release()?;
    }
    Err(LockError::Exhausted { start, end })
}
