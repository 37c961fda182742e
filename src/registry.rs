//! Name-keyed table of resource and component managers.
//!
//! Generic consumers (the asset pipeline, editors, bulk save/load) work
//! through the [`ResourceManagerEntry`] and [`ComponentManagerEntry`] trait
//! objects; code that knows the concrete kind downcasts with
//! [`ManagerRegistry::resources`] and friends.

use std::any::Any;
use std::path::Path;

use anyhow::Result;
use fxhash::FxHashMap;
use thiserror::Error;

use crate::dod::{
    Component, ComponentManager, EntityManager, EntityRef, Handle, Ref, Resource, ResourceFlags,
    ResourceManager, Storage,
};
use crate::name::Name;
use crate::property::{DescriptorError, Properties};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no manager registered for kind `{0}`")]
    UnknownKind(String),
}

/// Operations shared by every manager.
pub trait ManagerEntry: Any + Send + Sync {
    fn kind(&self) -> &'static str;
    fn destroy(&mut self, handle: Ref) -> bool;
    fn is_alive(&self, handle: Ref) -> bool;
    fn active_count(&self) -> u32;
    fn active_at(&self, index: u32) -> Ref;
    fn reset_to_default(&mut self, handle: Ref);
    fn compile_descriptor(&self, handle: Ref, generate_desc: bool) -> Properties;
    fn init_from_descriptor(
        &mut self,
        handle: Ref,
        properties: &Properties,
    ) -> Result<(), DescriptorError>;
    fn create_resources(&mut self, handles: &[Ref]);
    fn destroy_resources(&mut self, handles: &[Ref]);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Operations of named, persistable resource managers.
pub trait ResourceManagerEntry: ManagerEntry {
    fn create(&mut self, name: &str) -> Ref;
    fn find(&self, name: &str) -> Option<Ref>;
    fn name_of(&self, handle: Ref) -> Name;
    fn flags(&self, handle: Ref) -> ResourceFlags;
    fn storage(&self) -> Storage;
    fn save(&self, managers_dir: &Path) -> Result<()>;
    /// Returns the number of loaded resources.
    fn load(&mut self, managers_dir: &Path) -> Result<usize>;
}

/// Operations of per-entity component managers.
pub trait ComponentManagerEntry: ManagerEntry {
    fn create(&mut self, entity: EntityRef) -> Ref;
    fn component_for_entity(&self, entity: EntityRef) -> Option<Ref>;
}

fn typed<T>(handles: &[Ref]) -> Vec<Handle<T>> {
    handles.iter().map(|&raw| Handle::from_raw(raw)).collect()
}

impl<T: Resource> ManagerEntry for ResourceManager<T> {
    fn kind(&self) -> &'static str {
        T::KIND
    }

    fn destroy(&mut self, handle: Ref) -> bool {
        ResourceManager::destroy(self, Handle::from_raw(handle))
    }

    fn is_alive(&self, handle: Ref) -> bool {
        ResourceManager::is_alive(self, Handle::from_raw(handle))
    }

    fn active_count(&self) -> u32 {
        ResourceManager::active_count(self)
    }

    fn active_at(&self, index: u32) -> Ref {
        ResourceManager::active_at(self, index).raw()
    }

    fn reset_to_default(&mut self, handle: Ref) {
        ResourceManager::reset_to_default(self, Handle::from_raw(handle));
    }

    fn compile_descriptor(&self, handle: Ref, generate_desc: bool) -> Properties {
        ResourceManager::compile_descriptor(self, Handle::from_raw(handle), generate_desc)
    }

    fn init_from_descriptor(
        &mut self,
        handle: Ref,
        properties: &Properties,
    ) -> Result<(), DescriptorError> {
        ResourceManager::init_from_descriptor(self, Handle::from_raw(handle), properties)
    }

    fn create_resources(&mut self, handles: &[Ref]) {
        ResourceManager::create_resources(self, &typed(handles));
    }

    fn destroy_resources(&mut self, handles: &[Ref]) {
        ResourceManager::destroy_resources(self, &typed(handles));
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl<T: Resource> ResourceManagerEntry for ResourceManager<T> {
    fn create(&mut self, name: &str) -> Ref {
        ResourceManager::create(self, name).raw()
    }

    fn find(&self, name: &str) -> Option<Ref> {
        ResourceManager::find(self, name).map(Handle::raw)
    }

    fn name_of(&self, handle: Ref) -> Name {
        ResourceManager::name(self, Handle::from_raw(handle)).clone()
    }

    fn flags(&self, handle: Ref) -> ResourceFlags {
        ResourceManager::flags(self, Handle::from_raw(handle))
    }

    fn storage(&self) -> Storage {
        T::STORAGE
    }

    fn save(&self, managers_dir: &Path) -> Result<()> {
        ResourceManager::save(self, managers_dir)
    }

    fn load(&mut self, managers_dir: &Path) -> Result<usize> {
        ResourceManager::load(self, managers_dir).map(|handles| handles.len())
    }
}

impl<C: Component> ManagerEntry for ComponentManager<C> {
    fn kind(&self) -> &'static str {
        C::KIND
    }

    fn destroy(&mut self, handle: Ref) -> bool {
        ComponentManager::destroy(self, Handle::from_raw(handle))
    }

    fn is_alive(&self, handle: Ref) -> bool {
        ComponentManager::is_alive(self, Handle::from_raw(handle))
    }

    fn active_count(&self) -> u32 {
        ComponentManager::active_count(self)
    }

    fn active_at(&self, index: u32) -> Ref {
        ComponentManager::active_at(self, index).raw()
    }

    fn reset_to_default(&mut self, handle: Ref) {
        ComponentManager::reset_to_default(self, Handle::from_raw(handle));
    }

    fn compile_descriptor(&self, handle: Ref, generate_desc: bool) -> Properties {
        ComponentManager::compile_descriptor(self, Handle::from_raw(handle), generate_desc)
    }

    fn init_from_descriptor(
        &mut self,
        handle: Ref,
        properties: &Properties,
    ) -> Result<(), DescriptorError> {
        ComponentManager::init_from_descriptor(self, Handle::from_raw(handle), properties)
    }

    fn create_resources(&mut self, handles: &[Ref]) {
        ComponentManager::create_resources(self, &typed(handles));
    }

    fn destroy_resources(&mut self, handles: &[Ref]) {
        ComponentManager::destroy_resources(self, &typed(handles));
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl<C: Component> ComponentManagerEntry for ComponentManager<C> {
    fn create(&mut self, entity: EntityRef) -> Ref {
        ComponentManager::create(self, entity).raw()
    }

    fn component_for_entity(&self, entity: EntityRef) -> Option<Ref> {
        ComponentManager::component_for_entity(self, entity).map(Handle::raw)
    }
}

/// All managers of one application, built once at start-up.
#[derive(Default)]
pub struct ManagerRegistry {
    resources: FxHashMap<Name, Box<dyn ResourceManagerEntry>>,
    components: FxHashMap<Name, Box<dyn ComponentManagerEntry>>,
    resource_order: Vec<Name>,
    component_order: Vec<Name>,
    entities: EntityManager,
}

impl ManagerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the manager of a resource kind. Each kind registers once.
    pub fn register_resource<T: Resource>(&mut self, manager: ResourceManager<T>) {
        let kind = Name::new(T::KIND);
        let previous = self.resources.insert(kind.clone(), Box::new(manager));
        assert!(previous.is_none(), "resource kind `{kind}` registered twice");
        self.resource_order.push(kind);
    }

    pub fn register_component<C: Component>(&mut self, manager: ComponentManager<C>) {
        let kind = Name::new(C::KIND);
        let previous = self.components.insert(kind.clone(), Box::new(manager));
        assert!(previous.is_none(), "component kind `{kind}` registered twice");
        self.component_order.push(kind);
    }

    pub fn resource_entry(&self, kind: &str) -> Result<&dyn ResourceManagerEntry, RegistryError> {
        self.resources
            .get(&Name::new(kind))
            .map(|entry| &**entry)
            .ok_or_else(|| RegistryError::UnknownKind(kind.to_string()))
    }

    pub fn resource_entry_mut(
        &mut self,
        kind: &str,
    ) -> Result<&mut dyn ResourceManagerEntry, RegistryError> {
        match self.resources.get_mut(&Name::new(kind)) {
            Some(entry) => Ok(&mut **entry),
            None => Err(RegistryError::UnknownKind(kind.to_string())),
        }
    }

    pub fn component_entry(
        &self,
        kind: &str,
    ) -> Result<&dyn ComponentManagerEntry, RegistryError> {
        self.components
            .get(&Name::new(kind))
            .map(|entry| &**entry)
            .ok_or_else(|| RegistryError::UnknownKind(kind.to_string()))
    }

    pub fn component_entry_mut(
        &mut self,
        kind: &str,
    ) -> Result<&mut dyn ComponentManagerEntry, RegistryError> {
        match self.components.get_mut(&Name::new(kind)) {
            Some(entry) => Ok(&mut **entry),
            None => Err(RegistryError::UnknownKind(kind.to_string())),
        }
    }

    /// Resource kinds in registration order.
    pub fn resource_kinds(&self) -> &[Name] {
        &self.resource_order
    }

    pub fn component_kinds(&self) -> &[Name] {
        &self.component_order
    }

    /// Typed access to a registered resource manager.
    ///
    /// # Panics
    /// If `T` was never registered.
    pub fn resources<T: Resource>(&self) -> &ResourceManager<T> {
        self.resources
            .get(&Name::new(T::KIND))
            .and_then(|entry| entry.as_any().downcast_ref())
            .unwrap_or_else(|| panic!("resource kind `{}` is not registered", T::KIND))
    }

    pub fn resources_mut<T: Resource>(&mut self) -> &mut ResourceManager<T> {
        self.resources
            .get_mut(&Name::new(T::KIND))
            .and_then(|entry| entry.as_any_mut().downcast_mut())
            .unwrap_or_else(|| panic!("resource kind `{}` is not registered", T::KIND))
    }

    pub fn components<C: Component>(&self) -> &ComponentManager<C> {
        self.components
            .get(&Name::new(C::KIND))
            .and_then(|entry| entry.as_any().downcast_ref())
            .unwrap_or_else(|| panic!("component kind `{}` is not registered", C::KIND))
    }

    pub fn components_mut<C: Component>(&mut self) -> &mut ComponentManager<C> {
        self.components
            .get_mut(&Name::new(C::KIND))
            .and_then(|entry| entry.as_any_mut().downcast_mut())
            .unwrap_or_else(|| panic!("component kind `{}` is not registered", C::KIND))
    }

    pub fn entities(&self) -> &EntityManager {
        &self.entities
    }

    pub fn entities_mut(&mut self) -> &mut EntityManager {
        &mut self.entities
    }

    /// Saves every persistable resource kind below `managers_dir`.
    pub fn save_all(&self, managers_dir: &Path) -> Result<()> {
        for kind in &self.resource_order {
            self.resources[kind].save(managers_dir)?;
        }
        Ok(())
    }

    /// Loads every resource kind, returning the total number of resources.
    pub fn load_all(&mut self, managers_dir: &Path) -> Result<usize> {
        let mut total = 0;
        for kind in &self.resource_order {
            if let Some(entry) = self.resources.get_mut(kind) {
                let count = entry.load(managers_dir)?;
                if count > 0 {
                    log::info!("Loaded {count} {kind} resource(s)");
                }
                total += count;
            }
        }
        Ok(total)
    }
}
