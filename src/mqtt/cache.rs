use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::LinkResult;

/// Remembered broker port → TLS decisions.
///
/// Read on every connect, written only when a connection succeeds. Writers
/// hold the lock across persistence so concurrent sessions cannot interleave
/// file writes.
#[derive(Debug, Default)]
pub struct PortProtocolCache {
    entries: RwLock<HashMap<u16, bool>>,
    path: Option<PathBuf>,
}

impl PortProtocolCache {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load from a JSON file; a missing or unreadable file starts empty
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<HashMap<u16, bool>>(&text) {
                Ok(entries) => {
                    debug!("Loaded {} cached broker port decisions", entries.len());
                    entries
                }
                Err(e) => {
                    warn!("Ignoring corrupt port cache {}: {}", path.display(), e);
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };

        Self {
            entries: RwLock::new(entries),
            path: Some(path),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Cached TLS decision for `port`, if any
    pub fn get(&self, port: u16) -> Option<bool> {
        self.entries.read().get(&port).copied()
    }

    pub fn set(&self, port: u16, tls: bool) -> LinkResult<()> {
        let mut entries = self.entries.write();
        if entries.get(&port) == Some(&tls) {
            return Ok(());
        }
        entries.insert(port, tls);

        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let json = serde_json::to_string_pretty(&*entries)?;
            std::fs::write(path, json)?;
        }

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
