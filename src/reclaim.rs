//! Force-freeing ports held by processes that outlived their supervisor.
use std::sync::Arc;

use regex::Regex;
use strum_macros::{AsRefStr, Display, EnumString};
use tracing::{debug, info, warn};

use crate::{
    error::ReclaimError,
    process::{CommandRunner, Platform, SystemRunner, UtilityOutput},
};

/// Transport protocol of a bound port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, AsRefStr, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

/// Frees a port by killing whatever is bound to it.
pub trait Reclaim {
    /// Resolves successfully when nothing is bound to `port`.
    fn force_free_port(&self, port: u16, protocol: Protocol) -> Result<(), ReclaimError>;

    /// A detached routine freeing every TCP port in `ports`, run from signal handlers.
    fn reclaim_hook(&self, _ports: Vec<u16>) -> Option<Box<dyn FnOnce() + Send>> {
        None
    }
}

impl<T: Reclaim + ?Sized> Reclaim for &T {
    fn force_free_port(&self, port: u16, protocol: Protocol) -> Result<(), ReclaimError> {
        (**self).force_free_port(port, protocol)
    }

    fn reclaim_hook(&self, ports: Vec<u16>) -> Option<Box<dyn FnOnce() + Send>> {
        (**self).reclaim_hook(ports)
    }
}

/// Discovers port owners with `lsof` (POSIX) or `netstat -ano` (Windows) and kills them.
#[derive(Clone)]
pub struct PortReclaimer {
    platform: Platform,
    runner: Arc<dyn CommandRunner>,
}

impl Default for PortReclaimer {
    fn default() -> Self {
        Self::new()
    }
}

impl PortReclaimer {
    pub fn new() -> Self {
        Self::with_platform(Platform::current(), Arc::new(SystemRunner))
    }

    pub fn with_platform(platform: Platform, runner: Arc<dyn CommandRunner>) -> Self {
        Self { platform, runner }
    }

    fn run(&self, program: &str, args: Vec<String>) -> Result<UtilityOutput, ReclaimError> {
        self.runner
            .run(program, &args)
            .map_err(|source| ReclaimError::Utility {
                program: program.to_string(),
                source,
            })
    }

    fn owners(&self, port: u16, protocol: Protocol) -> Result<Vec<u32>, ReclaimError> {
        match self.platform {
            Platform::Posix => {
                let args = vec![
                    "-i".into(),
                    format!("{protocol}:{port}"),
                    "-P".into(),
                    "-n".into(),
                ];
                let output = self.run("lsof", args)?;
                // lsof exits non-zero with empty output when nothing matches.
                Ok(parse_lsof_pids(&output.stdout, protocol))
            }
            Platform::Windows => {
                let output = self.run("netstat", vec!["-ano".into()])?;
                Ok(parse_netstat_pids(&output.stdout, port, protocol))
            }
        }
    }

    fn kill_all(&self, port: u16, pids: &[u32]) -> Result<(), ReclaimError> {
        let (program, args) = match self.platform {
            Platform::Posix => {
                let mut args = vec!["-9".to_string()];
                args.extend(pids.iter().map(u32::to_string));
                ("kill", args)
            }
            Platform::Windows => {
                let mut args = vec!["/F".to_string()];
                for pid in pids {
                    args.push("/PID".into());
                    args.push(pid.to_string());
                }
                ("taskkill", args)
            }
        };

        let output = self.run(program, args)?;
        if output.success {
            return Ok(());
        }

        let reason = output.stderr.trim().to_string();
        let lower = reason.to_ascii_lowercase();
        if lower.contains("no such process") || lower.contains("not found") {
            debug!("Owners of port {port} exited on their own");
            return Ok(());
        }
        Err(ReclaimError::KillFailed {
            pid: pids.first().copied().unwrap_or_default(),
            port,
            reason,
        })
    }
}

impl Reclaim for PortReclaimer {
    fn force_free_port(&self, port: u16, protocol: Protocol) -> Result<(), ReclaimError> {
        if port == 0 {
            return Err(ReclaimError::InvalidPort(port));
        }

        let pids = self.owners(port, protocol)?;
        if pids.is_empty() {
            debug!("Port {port}/{protocol} is already free");
            return Ok(());
        }

        warn!("Port {port}/{protocol} still held by PID(s) {pids:?}; killing");
        self.kill_all(port, &pids)?;
        info!("Reclaimed port {port}/{protocol}");
        Ok(())
    }

    fn reclaim_hook(&self, ports: Vec<u16>) -> Option<Box<dyn FnOnce() + Send>> {
        let reclaimer = self.clone();
        Some(Box::new(move || {
            for port in ports {
                if let Err(err) = reclaimer.force_free_port(port, Protocol::Tcp) {
                    warn!("Failed to reclaim port {port}: {err}");
                }
            }
        }))
    }
}

/// PIDs from `lsof -i <proto>:<port> -P -n` output: listening sockets for TCP, any UDP socket.
pub fn parse_lsof_pids(stdout: &str, protocol: Protocol) -> Vec<u32> {
    let mut pids = Vec::new();
    for line in stdout.lines().skip_while(|line| line.starts_with("COMMAND")) {
        let relevant = match protocol {
            Protocol::Tcp => line.contains("(LISTEN)"),
            Protocol::Udp => line.contains("UDP"),
        };
        if !relevant {
            continue;
        }
        if let Some(pid) = line
            .split_whitespace()
            .nth(1)
            .and_then(|value| value.parse::<u32>().ok())
            && !pids.contains(&pid)
        {
            pids.push(pid);
        }
    }
    pids
}

/// PIDs from `netstat -ano` output whose local address ends in `:<port>`.
pub fn parse_netstat_pids(stdout: &str, port: u16, protocol: Protocol) -> Vec<u32> {
    let pattern = format!(
        r"^\s*{}\s+\S*:{port}\s",
        protocol.as_ref().to_ascii_uppercase()
    );
    let Ok(local_port) = Regex::new(&pattern) else {
        return Vec::new();
    };

    let mut pids = Vec::new();
    for line in stdout.lines().filter(|line| local_port.is_match(line)) {
        if let Some(pid) = line
            .split_whitespace()
            .last()
            .and_then(|value| value.parse::<u32>().ok())
            && pid != 0
            && !pids.contains(&pid)
        {
            pids.push(pid);
        }
    }
    pids
}
