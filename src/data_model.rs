use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::registry::ManagerRegistry;

/// Shared handle to the manager registry.
///
/// The pools themselves are not synchronized; every access from a thread
/// other than the owner goes through this lock.
#[derive(Default)]
pub struct DataModel {
    registry: Arc<RwLock<ManagerRegistry>>,
}

impl Clone for DataModel {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl DataModel {
    pub fn new(registry: ManagerRegistry) -> Self {
        Self {
            registry: Arc::new(RwLock::new(registry)),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, ManagerRegistry> {
        self.registry.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, ManagerRegistry> {
        self.registry.write()
    }

    /// Runs `updater` with exclusive access to the registry.
    pub fn update<F, R>(&self, updater: F) -> R
    where
        F: FnOnce(&mut ManagerRegistry) -> R,
    {
        let mut guard = self.registry.write();
        updater(&mut guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dod::ResourceManager;
    use crate::resources::Script;
    use std::thread;

    #[test]
    fn clones_share_the_registry() {
        let mut registry = ManagerRegistry::new();
        registry.register_resource(ResourceManager::<Script>::new());
        let model = DataModel::new(registry);

        let writer = model.clone();
        thread::spawn(move || {
            writer.update(|registry| {
                registry.resources_mut::<Script>().create("door");
            })
        })
        .join()
        .unwrap();

        assert!(model.read().resources::<Script>().find("door").is_some());
    }
}
