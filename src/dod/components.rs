use std::mem;
use std::ops::{Index, IndexMut};

use fxhash::FxHashMap;

use crate::dod::{Handle, Pool};
use crate::name::Name;
use crate::property::{
    DescriptorError, DescriptorReader, DescriptorWriter, Editor, Properties, Property,
    PropertyValue,
};

/// Marker for entity handles.
#[derive(Debug)]
pub enum Entity {}

pub type EntityRef = Handle<Entity>;

/// Named entities that components attach to.
pub struct EntityManager {
    pool: Pool,
    names: Vec<Name>,
    by_name: FxHashMap<Name, EntityRef>,
}

impl EntityManager {
    pub const CAPACITY: u32 = 65_536;

    pub fn new() -> Self {
        Self::with_capacity(Self::CAPACITY)
    }

    pub fn with_capacity(capacity: u32) -> Self {
        Self {
            pool: Pool::new(capacity),
            names: vec![Name::default(); capacity as usize],
            by_name: FxHashMap::default(),
        }
    }

    /// Creates an entity, renaming it when the name is taken.
    pub fn create(&mut self, name: &str) -> EntityRef {
        let name = self.make_name_unique(name);
        let entity = Handle::from_raw(self.pool.allocate());
        self.names[entity.raw().index()] = name.clone();
        self.by_name.insert(name, entity);
        entity
    }

    pub fn destroy(&mut self, entity: EntityRef) -> bool {
        if !self.is_alive(entity) {
            log::warn!("Ignoring destroy of dead entity {entity:?}");
            return false;
        }
        let name = mem::take(&mut self.names[entity.raw().index()]);
        self.by_name.remove(&name);
        self.pool.release(entity.raw())
    }

    pub fn is_alive(&self, entity: EntityRef) -> bool {
        self.pool.is_alive(entity.raw())
    }

    pub fn name(&self, entity: EntityRef) -> Option<&Name> {
        self.is_alive(entity)
            .then(|| &self.names[entity.raw().index()])
    }

    pub fn find(&self, name: &str) -> Option<EntityRef> {
        self.by_name.get(&Name::new(name)).copied()
    }

    pub fn active_count(&self) -> u32 {
        self.pool.active_count()
    }

    /// Returns `name` if unused, otherwise the name with its numeric suffix
    /// replaced by the first free index starting at 1.
    pub fn make_name_unique(&self, name: &str) -> Name {
        let candidate = Name::new(name);
        if !self.by_name.contains_key(&candidate) {
            return candidate;
        }
        let base = name.trim_end_matches(|c: char| c.is_ascii_digit());
        (1u32..)
            .map(|index| Name::new(&format!("{base}{index}")))
            .find(|candidate| !self.by_name.contains_key(candidate))
            .unwrap_or(candidate)
    }
}

impl Default for EntityManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-entity data of one component kind.
pub trait Component: Default + Send + Sync + 'static {
    const KIND: &'static str;
    const CAPACITY: u32;

    fn compile_descriptor(&self, out: &mut DescriptorWriter<'_>);

    fn init_from_descriptor(&mut self, reader: &DescriptorReader<'_>)
        -> Result<(), DescriptorError>;

    fn create_resources(&mut self) {}

    fn destroy_resources(&mut self) {}
}

/// Pool of components of kind `C`, at most one per entity.
pub struct ComponentManager<C: Component> {
    pool: Pool,
    data: Vec<C>,
    entities: Vec<EntityRef>,
    by_entity: FxHashMap<u32, Handle<C>>,
}

impl<C: Component> Default for ComponentManager<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Component> ComponentManager<C> {
    pub fn new() -> Self {
        Self::with_capacity(C::CAPACITY)
    }

    pub fn with_capacity(capacity: u32) -> Self {
        let slots = capacity as usize;
        Self {
            pool: Pool::new(capacity),
            data: (0..slots).map(|_| C::default()).collect(),
            entities: vec![EntityRef::INVALID; slots],
            by_entity: FxHashMap::default(),
        }
    }

    /// Attaches a default-initialized component to `entity`, replacing any
    /// component of this kind it already had.
    pub fn create(&mut self, entity: EntityRef) -> Handle<C> {
        if let Some(existing) = self.component_for_entity(entity) {
            self.destroy(existing);
        }
        let handle = Handle::from_raw(self.pool.allocate());
        let slot = handle.raw().index();
        self.data[slot] = C::default();
        self.entities[slot] = entity;
        self.by_entity.insert(entity.raw().id(), handle);
        handle
    }

    pub fn destroy(&mut self, handle: Handle<C>) -> bool {
        if !self.is_alive(handle) {
            log::warn!("Ignoring destroy of dead {} handle {handle:?}", C::KIND);
            return false;
        }
        let slot = handle.raw().index();
        self.data[slot].destroy_resources();
        self.data[slot] = C::default();
        let entity = mem::replace(&mut self.entities[slot], EntityRef::INVALID);
        if self.by_entity.get(&entity.raw().id()) == Some(&handle) {
            self.by_entity.remove(&entity.raw().id());
        }
        self.pool.release(handle.raw())
    }

    pub fn is_alive(&self, handle: Handle<C>) -> bool {
        self.pool.is_alive(handle.raw())
    }

    pub fn component_for_entity(&self, entity: EntityRef) -> Option<Handle<C>> {
        self.by_entity.get(&entity.raw().id()).copied()
    }

    pub fn entity_of(&self, handle: Handle<C>) -> EntityRef {
        self.check(handle);
        self.entities[handle.raw().index()]
    }

    pub fn reset_to_default(&mut self, handle: Handle<C>) {
        self[handle] = C::default();
    }

    pub fn active_count(&self) -> u32 {
        self.pool.active_count()
    }

    pub fn active_at(&self, index: u32) -> Handle<C> {
        Handle::from_raw(self.pool.active_at(index))
    }

    pub fn handles(&self) -> Vec<Handle<C>> {
        self.pool
            .active()
            .iter()
            .map(|&raw| Handle::from_raw(raw))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle<C>, &C)> + '_ {
        self.pool
            .active()
            .iter()
            .map(move |&raw| (Handle::from_raw(raw), &self.data[raw.index()]))
    }

    pub fn get(&self, handle: Handle<C>) -> Option<&C> {
        self.is_alive(handle)
            .then(|| &self.data[handle.raw().index()])
    }

    pub fn compile_descriptor(&self, handle: Handle<C>, generate_desc: bool) -> Properties {
        let mut properties = Properties::new();
        let mut writer = DescriptorWriter::new(&mut properties, generate_desc);
        writer.add(
            "entity",
            Property::new(
                "Component",
                Editor::Uint,
                PropertyValue::Uint(self.entity_of(handle).raw().id()),
            )
            .read_only()
            .internal(),
        );
        self[handle].compile_descriptor(&mut writer);
        properties
    }

    pub fn init_from_descriptor(
        &mut self,
        handle: Handle<C>,
        properties: &Properties,
    ) -> Result<(), DescriptorError> {
        self[handle].init_from_descriptor(&DescriptorReader::new(properties))
    }

    pub fn create_resources(&mut self, handles: &[Handle<C>]) {
        for &handle in handles {
            if self.is_alive(handle) {
                self.data[handle.raw().index()].create_resources();
            }
        }
    }

    pub fn destroy_resources(&mut self, handles: &[Handle<C>]) {
        for &handle in handles {
            if self.is_alive(handle) {
                self.data[handle.raw().index()].destroy_resources();
            }
        }
    }

    fn check(&self, handle: Handle<C>) {
        assert!(
            self.is_alive(handle),
            "{} handle {handle:?} is not alive",
            C::KIND
        );
    }
}

impl<C: Component> Index<Handle<C>> for ComponentManager<C> {
    type Output = C;

    fn index(&self, handle: Handle<C>) -> &C {
        self.check(handle);
        &self.data[handle.raw().index()]
    }
}

impl<C: Component> IndexMut<Handle<C>> for ComponentManager<C> {
    fn index_mut(&mut self, handle: Handle<C>) -> &mut C {
        self.check(handle);
        &mut self.data[handle.raw().index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Tag {
        label: String,
        loads: u32,
    }

    impl Component for Tag {
        const KIND: &'static str = "Tag";
        const CAPACITY: u32 = 4;

        fn compile_descriptor(&self, out: &mut DescriptorWriter<'_>) {
            out.add(
                "label",
                Property::new("Tag", Editor::String, PropertyValue::Str(self.label.clone())),
            );
        }

        fn init_from_descriptor(
            &mut self,
            reader: &DescriptorReader<'_>,
        ) -> Result<(), DescriptorError> {
            reader.string("label", &mut self.label)
        }

        fn create_resources(&mut self) {
            self.loads += 1;
        }
    }

    #[test]
    fn entity_names_are_made_unique() {
        let mut entities = EntityManager::with_capacity(8);
        let a = entities.create("Crate");
        let b = entities.create("Crate");
        let c = entities.create("Crate1");
        assert_eq!(entities.name(a).unwrap(), "Crate");
        assert_eq!(entities.name(b).unwrap(), "Crate1");
        assert_eq!(entities.name(c).unwrap(), "Crate2");
    }

    #[test]
    fn components_are_found_by_entity() {
        let mut entities = EntityManager::with_capacity(8);
        let mut tags = ComponentManager::<Tag>::new();
        let entity = entities.create("Probe");
        let tag = tags.create(entity);
        tags[tag].label = "north".into();
        assert_eq!(tags.component_for_entity(entity), Some(tag));
        assert_eq!(tags.entity_of(tag), entity);

        let properties = tags.compile_descriptor(tag, false);
        let other = tags.create(entities.create("Other"));
        tags.init_from_descriptor(other, &properties).unwrap();
        assert_eq!(tags[other].label, "north");

        tags.destroy(tag);
        assert!(tags.component_for_entity(entity).is_none());
    }

    #[test]
    fn create_resources_runs_per_component() {
        let mut tags = ComponentManager::<Tag>::new();
        let tag = tags.create(EntityRef::from_raw(crate::dod::Ref::new(3, 0)));
        tags.create_resources(&[tag]);
        tags.create_resources(&[tag]);
        assert_eq!(tags[tag].loads, 2);
    }
}
