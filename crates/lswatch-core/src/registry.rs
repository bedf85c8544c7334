//! Live backend managers, keyed by backend singleton or workspace.

use crate::managers::{LanguageServerExtensionManager, ManagerState};
use crate::workspace::WorkspaceIdentity;
use lswatch_config::BackendType;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Where a manager lives in the registry.
///
/// Rich and Disabled are singletons; Basic managers are per workspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegistryKey {
    Singleton(BackendType),
    Workspace(WorkspaceIdentity),
}

impl RegistryKey {
    pub fn resolve(backend: BackendType, workspace: &WorkspaceIdentity) -> Self {
        if backend.is_singleton() {
            RegistryKey::Singleton(backend)
        } else {
            RegistryKey::Workspace(workspace.clone())
        }
    }
}

impl fmt::Display for RegistryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryKey::Singleton(backend) => write!(f, "{backend}"),
            RegistryKey::Workspace(workspace) => write!(f, "{workspace}"),
        }
    }
}

/// Observable state of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    NoManager,
    Starting,
    /// `inert` is set when the backend could not be started and the manager
    /// only reported that to the user.
    Running { inert: bool },
    Stopping,
}

#[derive(Clone)]
pub struct RegistryEntry {
    pub manager: Arc<dyn LanguageServerExtensionManager>,
    pub workspace: WorkspaceIdentity,
}

impl RegistryEntry {
    fn key_state(&self) -> KeyState {
        match self.manager.state() {
            ManagerState::Created if self.manager.can_start_language_server() => KeyState::Starting,
            ManagerState::Created => KeyState::Running { inert: true },
            ManagerState::Started => KeyState::Running { inert: false },
            ManagerState::Stopped => KeyState::Stopping,
            ManagerState::Disposed => KeyState::NoManager,
        }
    }
}

/// Snapshot of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerStatus {
    pub key: RegistryKey,
    pub workspace: WorkspaceIdentity,
    pub backend: BackendType,
    pub state: KeyState,
}

/// At most one live manager per key. Replacing or removing an entry stops
/// and disposes the manager it held.
#[derive(Default)]
pub struct Registry {
    entries: HashMap<RegistryKey, RegistryEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &RegistryKey) -> Option<&RegistryEntry> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: RegistryKey, entry: RegistryEntry) {
        if let Some(previous) = self.entries.remove(&key) {
            teardown(&key, previous);
        }
        self.entries.insert(key, entry);
    }

    /// Stop, dispose and forget the manager at `key`.
    pub fn remove(&mut self, key: &RegistryKey) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                teardown(key, entry);
                true
            }
            None => false,
        }
    }

    /// Remove every entry whose manager runs a backend other than `keep`.
    pub fn retain_backend(&mut self, keep: BackendType) -> usize {
        let stale: Vec<RegistryKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.manager.backend_type() != keep)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            self.remove(key);
        }
        stale.len()
    }

    /// Remove every entry serving `workspace`, whatever its key.
    pub fn remove_workspace(&mut self, workspace: &WorkspaceIdentity) -> usize {
        let bound: Vec<RegistryKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| &entry.workspace == workspace)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &bound {
            self.remove(key);
        }
        bound.len()
    }

    /// Tear down every entry, returning the workspaces they served.
    pub fn drain(&mut self) -> Vec<WorkspaceIdentity> {
        let keys: Vec<RegistryKey> = self.entries.keys().cloned().collect();
        self.drain_keys(keys)
    }

    /// Like [`Registry::drain`], but inert entries stay.
    pub fn drain_startable(&mut self) -> Vec<WorkspaceIdentity> {
        let keys: Vec<RegistryKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.manager.can_start_language_server())
            .map(|(key, _)| key.clone())
            .collect();
        self.drain_keys(keys)
    }

    fn drain_keys(&mut self, mut keys: Vec<RegistryKey>) -> Vec<WorkspaceIdentity> {
        keys.sort();
        keys.into_iter()
            .filter_map(|key| {
                let entry = self.entries.remove(&key)?;
                let workspace = entry.workspace.clone();
                teardown(&key, entry);
                Some(workspace)
            })
            .collect()
    }

    pub fn state(&self, key: &RegistryKey) -> KeyState {
        self.entries
            .get(key)
            .map(RegistryEntry::key_state)
            .unwrap_or(KeyState::NoManager)
    }

    pub fn status(&self) -> Vec<ManagerStatus> {
        let mut status: Vec<ManagerStatus> = self
            .entries
            .iter()
            .map(|(key, entry)| ManagerStatus {
                key: key.clone(),
                workspace: entry.workspace.clone(),
                backend: entry.manager.backend_type(),
                state: entry.key_state(),
            })
            .collect();
        status.sort_by(|a, b| a.key.cmp(&b.key));
        status
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn teardown(key: &RegistryKey, entry: RegistryEntry) {
    info!(key = %key, workspace = %entry.workspace, "Stopping language server");
    entry.manager.stop_language_server();
    entry.manager.dispose();
}
