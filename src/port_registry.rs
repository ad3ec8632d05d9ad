use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Which managed project owns which port.
///
/// Only the supervisor's control loop touches this, so there is no locking.
#[derive(Debug, Default, Clone)]
pub struct PortRegistry {
    owners: BTreeMap<u16, PathBuf>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the owner of `port`.
    pub fn record_ownership(&mut self, port: u16, path: &Path) {
        if let Some(previous) = self.owners.insert(port, path.to_path_buf())
            && previous != path
        {
            warn!(
                "port {port} reassigned from {} to {}",
                previous.display(),
                path.display()
            );
        }
    }

    /// Remove every port mapped to `path`, returning what was released.
    pub fn release_ownership(&mut self, path: &Path) -> Vec<u16> {
        let released = self.ports_of(path);
        self.owners.retain(|_, owner| owner != path);
        released
    }

    pub fn release_port(&mut self, port: u16, path: &Path) {
        if self.owners.get(&port).is_some_and(|owner| owner == path) {
            self.owners.remove(&port);
        }
    }

    pub fn owner_of(&self, port: u16) -> Option<&Path> {
        self.owners.get(&port).map(PathBuf::as_path)
    }

    pub fn ports_of(&self, path: &Path) -> Vec<u16> {
        self.owners
            .iter()
            .filter(|(_, owner)| *owner == path)
            .map(|(port, _)| *port)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &Path)> {
        self.owners.iter().map(|(port, path)| (*port, path.as_path()))
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}
