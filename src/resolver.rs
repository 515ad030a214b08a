//! Resolution of the companion project a test project implicitly depends on.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{cache::CompanionCache, config::TaskHost, error::HarnessError};

/// Emulator declaration file colocated with a companion project.
pub const FIREBASE_CONFIG_FILE: &str = "firebase.json";

/// Pseudo-services whose ports say nothing about readiness.
pub const IGNORED_SERVICES: [&str; 2] = ["ui", "hosting"];

/// One declared emulator and its port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmulatorPort {
    pub service: String,
    pub port: u16,
}

/// A companion project with emulators to supervise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Companion {
    /// Name of the companion project.
    pub project: String,
    /// Project root, relative to the workspace root.
    pub root: PathBuf,
    /// Readiness-relevant emulators in declaration order.
    pub emulators: Vec<EmulatorPort>,
}

impl Companion {
    /// Every declared emulator port, without duplicates.
    pub fn emulator_ports(&self) -> Vec<u16> {
        let mut ports = Vec::with_capacity(self.emulators.len());
        for emulator in &self.emulators {
            if !ports.contains(&emulator.port) {
                ports.push(emulator.port);
            }
        }
        ports
    }

    /// Port used for readiness: the first declared emulator, restricted to `only` when non-empty.
    pub fn first_port(&self, only: &[String]) -> Option<u16> {
        self.emulators
            .iter()
            .find(|emulator| only.is_empty() || only.iter().any(|name| *name == emulator.service))
            .map(|emulator| emulator.port)
    }
}

/// Extracts readiness-relevant emulator ports from a `firebase.json` document.
///
/// Skips `ui`/`hosting`, entries with `"enabled": false`, and ports that are not numeric.
/// Numeric strings are accepted.
pub fn parse_emulator_ports(config: &Value) -> Vec<EmulatorPort> {
    let Some(emulators) = config.get("emulators").and_then(Value::as_object) else {
        return Vec::new();
    };

    let mut found = Vec::new();
    for (service, entry) in emulators {
        if IGNORED_SERVICES.contains(&service.as_str()) {
            continue;
        }
        let Some(entry) = entry.as_object() else {
            continue;
        };
        if entry.get("enabled").and_then(Value::as_bool) == Some(false) {
            debug!("Emulator '{service}' is disabled");
            continue;
        }

        let port = match entry.get("port") {
            Some(Value::Number(number)) => number.as_u64(),
            Some(Value::String(text)) => text.trim().parse::<u64>().ok(),
            _ => None,
        };
        match port.and_then(|port| u16::try_from(port).ok()).filter(|port| *port != 0) {
            Some(port) => found.push(EmulatorPort {
                service: service.clone(),
                port,
            }),
            None => warn!("Ignoring emulator '{service}' without a usable port"),
        }
    }
    found
}

/// Finds the companion of a project through its first implicit dependency.
pub struct DependencyResolver<'a, H: ?Sized> {
    host: &'a H,
    cache: Option<&'a CompanionCache>,
}

impl<'a, H: TaskHost + ?Sized> DependencyResolver<'a, H> {
    pub fn new(host: &'a H) -> Self {
        Self { host, cache: None }
    }

    /// Reuses derived metadata from `cache` when the inputs are unchanged.
    pub fn with_cache(mut self, cache: &'a CompanionCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// The companion with emulators `project_name` depends on, or `None` when there is nothing
    /// to supervise.
    pub fn resolve_companion(&self, project_name: &str) -> Result<Option<Companion>, HarnessError> {
        let project = self.host.project(project_name).ok_or_else(|| {
            HarnessError::config(format!("Cannot find project '{project_name}'"))
        })?;

        let Some(dependency) = project.implicit_dependencies.first() else {
            debug!("'{project_name}' declares no implicit dependency");
            return Ok(None);
        };
        let companion = self.host.project(dependency).ok_or_else(|| {
            HarnessError::config(format!(
                "Implicit dependency '{dependency}' of '{project_name}' is not a known project"
            ))
        })?;

        let root = PathBuf::from(&companion.root);
        let Some(content) = self.host.read_text(&root.join(FIREBASE_CONFIG_FILE))? else {
            debug!("'{dependency}' has no {FIREBASE_CONFIG_FILE}");
            return Ok(None);
        };

        let key = self
            .cache
            .map(|cache| cache.key(project_name, &root, content.as_bytes()));
        if let (Some(cache), Some(key)) = (self.cache, key.as_deref())
            && let Some(hit) = cache.get(key)
        {
            debug!("Companion of '{project_name}' served from cache");
            return Ok(Some(hit));
        }

        let config: Value = serde_json::from_str(&content)?;
        let emulators = parse_emulator_ports(&config);
        if emulators.is_empty() {
            debug!("'{dependency}' declares no emulators");
            return Ok(None);
        }

        let resolved = Companion {
            project: dependency.clone(),
            root,
            emulators,
        };
        if let (Some(cache), Some(key)) = (self.cache, key.as_deref())
            && let Err(err) = cache.put(key, &resolved)
        {
            warn!("Failed to cache companion metadata: {err}");
        }
        Ok(Some(resolved))
    }

    /// Absolute root of a resolved companion.
    pub fn companion_dir(&self, companion: &Companion) -> PathBuf {
        self.host.workspace_root().join(Path::new(&companion.root))
    }
}
