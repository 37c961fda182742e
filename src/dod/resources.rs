use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::BufWriter;
use std::mem;
use std::ops::{Index, IndexMut};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fxhash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::dod::{Handle, Pool};
use crate::name::Name;
use crate::property::{
    DescriptorError, DescriptorReader, DescriptorWriter, Editor, Properties, Property,
    PropertyValue,
};

/// Per-resource bookkeeping flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ResourceFlags(u8);

impl ResourceFlags {
    pub const NONE: ResourceFlags = ResourceFlags(0);
    /// Runtime-only resource, never written to disk.
    pub const VOLATILE: ResourceFlags = ResourceFlags(0x01);

    pub const fn contains(self, other: ResourceFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: ResourceFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: ResourceFlags) {
        self.0 &= !other.0;
    }
}

/// Where a resource kind lives on disk, relative to the managers directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// All resources in one JSON array, e.g. `Material.manager.json`.
    SingleFile(&'static str),
    /// One file per resource: `<directory>/<name><extension>`.
    MultipleFiles {
        directory: &'static str,
        extension: &'static str,
    },
    /// Never persisted.
    Transient,
}

/// Descriptor struct of one resource kind.
pub trait Resource: Default + Send + Sync + 'static {
    const KIND: &'static str;
    const CAPACITY: u32;
    const STORAGE: Storage;
    const DEFAULT_FLAGS: ResourceFlags = ResourceFlags::NONE;

    fn compile_descriptor(&self, out: &mut DescriptorWriter<'_>);

    fn init_from_descriptor(&mut self, reader: &DescriptorReader<'_>)
        -> Result<(), DescriptorError>;

    /// Derives runtime state from the descriptor fields.
    fn create_resources(&mut self, _name: &Name) {}

    fn destroy_resources(&mut self) {}
}

/// On-disk document of one resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDocument {
    pub name: Name,
    #[serde(default)]
    pub properties: Properties,
}

/// Fixed-capacity pool of resources of kind `T` with name lookup.
pub struct ResourceManager<T: Resource> {
    pool: Pool,
    data: Vec<T>,
    names: Vec<Name>,
    flags: Vec<ResourceFlags>,
    by_name: FxHashMap<Name, Handle<T>>,
    default_name: Option<Name>,
}

impl<T: Resource> Default for ResourceManager<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Resource> ResourceManager<T> {
    pub fn new() -> Self {
        Self::with_capacity(T::CAPACITY)
    }

    pub fn with_capacity(capacity: u32) -> Self {
        let slots = capacity as usize;
        Self {
            pool: Pool::new(capacity),
            data: (0..slots).map(|_| T::default()).collect(),
            names: vec![Name::default(); slots],
            flags: vec![ResourceFlags::NONE; slots],
            by_name: FxHashMap::default(),
            default_name: None,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.pool.capacity()
    }

    /// Creates a default-initialized resource. An existing resource with the
    /// same name is destroyed first.
    pub fn create(&mut self, name: impl Into<Name>) -> Handle<T> {
        let name = name.into();
        if let Some(existing) = self.by_name.get(&name).copied() {
            log::debug!("Recreating {} `{name}`", T::KIND);
            self.destroy(existing);
        }
        let handle = Handle::from_raw(self.pool.allocate());
        let slot = handle.raw().index();
        self.data[slot] = T::default();
        self.flags[slot] = T::DEFAULT_FLAGS;
        self.names[slot] = name.clone();
        if !name.is_empty() {
            self.by_name.insert(name, handle);
        }
        handle
    }

    /// Releases the slot and its runtime resources. Returns `false` for a
    /// handle that is not alive.
    pub fn destroy(&mut self, handle: Handle<T>) -> bool {
        if !self.is_alive(handle) {
            log::warn!("Ignoring destroy of dead {} handle {handle:?}", T::KIND);
            return false;
        }
        let slot = handle.raw().index();
        self.data[slot].destroy_resources();
        self.data[slot] = T::default();
        let name = mem::take(&mut self.names[slot]);
        if self.by_name.get(&name) == Some(&handle) {
            self.by_name.remove(&name);
        }
        self.pool.release(handle.raw())
    }

    /// Destroys every live resource.
    pub fn clear(&mut self) {
        for handle in self.handles() {
            self.destroy(handle);
        }
    }

    pub fn is_alive(&self, handle: Handle<T>) -> bool {
        self.pool.is_alive(handle.raw())
    }

    pub fn reset_to_default(&mut self, handle: Handle<T>) {
        self[handle] = T::default();
    }

    pub fn active_count(&self) -> u32 {
        self.pool.active_count()
    }

    pub fn active_at(&self, index: u32) -> Handle<T> {
        Handle::from_raw(self.pool.active_at(index))
    }

    /// Snapshot of the live handles in active-list order.
    pub fn handles(&self) -> Vec<Handle<T>> {
        self.pool
            .active()
            .iter()
            .map(|&raw| Handle::from_raw(raw))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> + '_ {
        self.pool
            .active()
            .iter()
            .map(move |&raw| (Handle::from_raw(raw), &self.data[raw.index()]))
    }

    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        self.is_alive(handle)
            .then(|| &self.data[handle.raw().index()])
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        if self.is_alive(handle) {
            Some(&mut self.data[handle.raw().index()])
        } else {
            None
        }
    }

    pub fn name(&self, handle: Handle<T>) -> &Name {
        self.check(handle);
        &self.names[handle.raw().index()]
    }

    pub fn rename(&mut self, handle: Handle<T>, name: impl Into<Name>) {
        self.check(handle);
        let name = name.into();
        let slot = handle.raw().index();
        let old = mem::replace(&mut self.names[slot], name.clone());
        if self.by_name.get(&old) == Some(&handle) {
            self.by_name.remove(&old);
        }
        if !name.is_empty() {
            if let Some(previous) = self.by_name.insert(name.clone(), handle) {
                if previous != handle {
                    log::warn!("{} `{name}` now shadows {previous:?}", T::KIND);
                }
            }
        }
    }

    /// Looks a resource up by name.
    pub fn find(&self, name: &str) -> Option<Handle<T>> {
        self.by_name.get(&Name::new(name)).copied()
    }

    /// Resource used by [`find_or_default`](Self::find_or_default) when a
    /// name cannot be resolved.
    pub fn set_default_resource(&mut self, name: impl Into<Name>) {
        self.default_name = Some(name.into());
    }

    /// Looks a resource up by name, falling back to the default resource.
    pub fn find_or_default(&self, name: &str) -> Option<Handle<T>> {
        if let Some(handle) = self.find(name) {
            return Some(handle);
        }
        let fallback = self
            .default_name
            .as_ref()
            .and_then(|default| self.by_name.get(default).copied());
        match &fallback {
            Some(_) => log::warn!("{} `{name}` not found, using the default", T::KIND),
            None => log::warn!("{} `{name}` not found and no default is set", T::KIND),
        }
        fallback
    }

    pub fn flags(&self, handle: Handle<T>) -> ResourceFlags {
        self.check(handle);
        self.flags[handle.raw().index()]
    }

    pub fn flags_mut(&mut self, handle: Handle<T>) -> &mut ResourceFlags {
        self.check(handle);
        &mut self.flags[handle.raw().index()]
    }

    /// Compiles the `name` property followed by the kind's fields.
    pub fn compile_descriptor(&self, handle: Handle<T>, generate_desc: bool) -> Properties {
        let mut properties = Properties::new();
        let mut writer = DescriptorWriter::new(&mut properties, generate_desc);
        writer.add(
            "name",
            Property::new(
                "Resource",
                Editor::String,
                PropertyValue::Str(self.name(handle).to_string()),
            ),
        );
        self[handle].compile_descriptor(&mut writer);
        properties
    }

    pub fn init_from_descriptor(
        &mut self,
        handle: Handle<T>,
        properties: &Properties,
    ) -> Result<(), DescriptorError> {
        let reader = DescriptorReader::new(properties);
        let mut name = self.name(handle).clone();
        reader.name("name", &mut name)?;
        if name != *self.name(handle) {
            self.rename(handle, name);
        }
        self[handle].init_from_descriptor(&reader)
    }

    pub fn create_resources(&mut self, handles: &[Handle<T>]) {
        for &handle in handles {
            if let Some(slot) = self.live_slot(handle) {
                let name = self.names[slot].clone();
                self.data[slot].create_resources(&name);
            }
        }
    }

    pub fn destroy_resources(&mut self, handles: &[Handle<T>]) {
        for &handle in handles {
            if let Some(slot) = self.live_slot(handle) {
                self.data[slot].destroy_resources();
            }
        }
    }

    pub fn create_all_resources(&mut self) {
        let handles = self.handles();
        self.create_resources(&handles);
    }

    fn document(&self, handle: Handle<T>) -> ResourceDocument {
        ResourceDocument {
            name: self.name(handle).clone(),
            properties: self.compile_descriptor(handle, false),
        }
    }

    fn persistent_handles(&self) -> Vec<Handle<T>> {
        let mut handles: Vec<_> = self
            .handles()
            .into_iter()
            .filter(|&handle| !self.flags(handle).contains(ResourceFlags::VOLATILE))
            .collect();
        handles.sort_by(|a, b| self.name(*a).cmp(self.name(*b)));
        handles
    }

    /// Writes every non-volatile resource into one JSON array.
    pub fn save_to_single_file(&self, path: &Path) -> Result<()> {
        let documents: Vec<_> = self
            .persistent_handles()
            .into_iter()
            .map(|handle| self.document(handle))
            .collect();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &documents)
            .with_context(|| format!("failed to write {}", path.display()))?;
        log::info!(
            "Saved {} {} resource(s) to {}",
            documents.len(),
            T::KIND,
            path.display()
        );
        Ok(())
    }

    pub fn load_from_single_file(&mut self, path: &Path) -> Result<Vec<Handle<T>>> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let documents: Vec<ResourceDocument> = serde_json::from_str(&text)
            .with_context(|| format!("malformed {} manager file {}", T::KIND, path.display()))?;
        self.load_documents(documents)
    }

    /// Writes one file per non-volatile resource after removing files of
    /// resources that no longer exist.
    pub fn save_to_multiple_files(&self, directory: &Path, extension: &str) -> Result<()> {
        fs::create_dir_all(directory)
            .with_context(|| format!("failed to create {}", directory.display()))?;
        let live: FxHashSet<String> = self
            .handles()
            .into_iter()
            .map(|handle| self.name(handle).file_stem().into_owned())
            .collect();
        for path in files_with_extension(directory, extension)? {
            let stale = file_stem(&path, extension).map_or(false, |stem| !live.contains(stem));
            if stale {
                fs::remove_file(&path)
                    .with_context(|| format!("failed to remove {}", path.display()))?;
                log::info!("Removed stale {} file {}", T::KIND, path.display());
            }
        }
        for handle in self.persistent_handles() {
            self.save_resource_to_file(handle, directory, extension)?;
        }
        Ok(())
    }

    /// Writes `<directory>/<name><extension>` for one resource, with path
    /// separators in the name replaced.
    pub fn save_resource_to_file(
        &self,
        handle: Handle<T>,
        directory: &Path,
        extension: &str,
    ) -> Result<PathBuf> {
        let path = directory.join(format!("{}{extension}", self.name(handle).file_stem()));
        fs::create_dir_all(directory)
            .with_context(|| format!("failed to create {}", directory.display()))?;
        let file = File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        serde_json::to_writer(BufWriter::new(file), &self.document(handle))
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    pub fn load_from_multiple_files(
        &mut self,
        directory: &Path,
        extension: &str,
    ) -> Result<Vec<Handle<T>>> {
        if !directory.is_dir() {
            log::debug!("No {} directory at {}", T::KIND, directory.display());
            return Ok(Vec::new());
        }
        let mut documents = Vec::new();
        for path in files_with_extension(directory, extension)? {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let document: ResourceDocument = serde_json::from_str(&text)
                .with_context(|| format!("malformed {} file {}", T::KIND, path.display()))?;
            documents.push(document);
        }
        self.load_documents(documents)
    }

    /// Saves according to the kind's [`Storage`].
    pub fn save(&self, managers_dir: &Path) -> Result<()> {
        match T::STORAGE {
            Storage::SingleFile(file_name) => {
                self.save_to_single_file(&managers_dir.join(file_name))
            }
            Storage::MultipleFiles {
                directory,
                extension,
            } => self.save_to_multiple_files(&managers_dir.join(directory), extension),
            Storage::Transient => Ok(()),
        }
    }

    /// Loads according to the kind's [`Storage`]. A missing file or
    /// directory loads nothing.
    pub fn load(&mut self, managers_dir: &Path) -> Result<Vec<Handle<T>>> {
        match T::STORAGE {
            Storage::SingleFile(file_name) => {
                let path = managers_dir.join(file_name);
                if path.is_file() {
                    self.load_from_single_file(&path)
                } else {
                    log::debug!("No {} manager file at {}", T::KIND, path.display());
                    Ok(Vec::new())
                }
            }
            Storage::MultipleFiles {
                directory,
                extension,
            } => self.load_from_multiple_files(&managers_dir.join(directory), extension),
            Storage::Transient => Ok(Vec::new()),
        }
    }

    fn load_documents(&mut self, documents: Vec<ResourceDocument>) -> Result<Vec<Handle<T>>> {
        let mut handles = Vec::with_capacity(documents.len());
        for document in documents {
            let handle = self.create(document.name.clone());
            self.init_from_descriptor(handle, &document.properties)
                .with_context(|| format!("invalid {} `{}`", T::KIND, document.name))?;
            handles.push(handle);
        }
        // A later document with the same name replaced the earlier one.
        handles.retain(|&handle| self.is_alive(handle));
        self.create_resources(&handles);
        Ok(handles)
    }

    fn live_slot(&self, handle: Handle<T>) -> Option<usize> {
        self.is_alive(handle).then(|| handle.raw().index())
    }

    fn check(&self, handle: Handle<T>) {
        assert!(
            self.is_alive(handle),
            "{} handle {handle:?} is not alive",
            T::KIND
        );
    }
}

impl<T: Resource> Index<Handle<T>> for ResourceManager<T> {
    type Output = T;

    fn index(&self, handle: Handle<T>) -> &T {
        self.check(handle);
        &self.data[handle.raw().index()]
    }
}

impl<T: Resource> IndexMut<Handle<T>> for ResourceManager<T> {
    fn index_mut(&mut self, handle: Handle<T>) -> &mut T {
        self.check(handle);
        &mut self.data[handle.raw().index()]
    }
}

fn files_with_extension(directory: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    let entries = fs::read_dir(directory)
        .with_context(|| format!("failed to list {}", directory.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && file_stem(&path, extension).is_some() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn file_stem<'a>(path: &'a Path, extension: &str) -> Option<&'a str> {
    path.file_name()
        .and_then(OsStr::to_str)
        .and_then(|file_name| file_name.strip_suffix(extension))
        .filter(|stem| !stem.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Note {
        text: String,
        weight: f32,
        created: u32,
    }

    impl Resource for Note {
        const KIND: &'static str = "Note";
        const CAPACITY: u32 = 8;
        const STORAGE: Storage = Storage::MultipleFiles {
            directory: "notes",
            extension: ".note.json",
        };

        fn compile_descriptor(&self, out: &mut DescriptorWriter<'_>) {
            out.add(
                "text",
                Property::new("Note", Editor::String, PropertyValue::Str(self.text.clone())),
            );
            out.add(
                "weight",
                Property::new("Note", Editor::Float, PropertyValue::Float(self.weight)),
            );
        }

        fn init_from_descriptor(
            &mut self,
            reader: &DescriptorReader<'_>,
        ) -> Result<(), DescriptorError> {
            reader.string("text", &mut self.text)?;
            reader.float("weight", &mut self.weight)
        }

        fn create_resources(&mut self, _name: &Name) {
            self.created += 1;
        }
    }

    fn note(manager: &mut ResourceManager<Note>, name: &str, weight: f32) -> Handle<Note> {
        let handle = manager.create(name);
        manager[handle].text = format!("about {name}");
        manager[handle].weight = weight;
        handle
    }

    #[test]
    fn duplicate_name_recreates() {
        let mut manager = ResourceManager::<Note>::new();
        let first = note(&mut manager, "crate", 1.0);
        let second = manager.create("crate");
        assert!(!manager.is_alive(first));
        assert!(manager.is_alive(second));
        assert_eq!(manager.active_count(), 1);
        assert_eq!(manager[second], Note::default());
        assert_eq!(manager.find("crate"), Some(second));
    }

    #[test]
    fn destroy_removes_name_and_rejects_stale_handles() {
        let mut manager = ResourceManager::<Note>::new();
        let handle = note(&mut manager, "crate", 1.0);
        assert!(manager.destroy(handle));
        assert!(manager.find("crate").is_none());
        assert!(manager.get(handle).is_none());
        assert!(!manager.destroy(handle));
    }

    #[test]
    #[should_panic(expected = "is not alive")]
    fn indexing_a_stale_handle_panics() {
        let mut manager = ResourceManager::<Note>::new();
        let handle = manager.create("crate");
        manager.destroy(handle);
        let _ = &manager[handle];
    }

    #[test]
    fn find_or_default_falls_back() {
        let mut manager = ResourceManager::<Note>::new();
        let fallback = manager.create("checkerboard");
        manager.set_default_resource("checkerboard");
        assert_eq!(manager.find_or_default("missing"), Some(fallback));
    }

    #[test]
    fn descriptor_round_trip_keeps_fields_and_name() {
        let mut manager = ResourceManager::<Note>::new();
        let handle = note(&mut manager, "crate", 0.3);
        let properties = manager.compile_descriptor(handle, true);
        let copy = manager.create("copy");
        manager.init_from_descriptor(copy, &properties).unwrap();
        assert_eq!(manager.name(copy), "crate");
        assert_eq!(manager[copy].text, "about crate");
        assert_eq!(manager[copy].weight.to_bits(), 0.3f32.to_bits());
    }

    #[test]
    fn single_file_round_trip_skips_volatile() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Note.manager.json");
        let mut manager = ResourceManager::<Note>::new();
        note(&mut manager, "a", 1.5);
        note(&mut manager, "b", -2.25);
        let scratch = note(&mut manager, "scratch", 0.0);
        manager.flags_mut(scratch).insert(ResourceFlags::VOLATILE);
        manager.save_to_single_file(&path).unwrap();

        manager.clear();
        assert_eq!(manager.active_count(), 0);
        let loaded = manager.load_from_single_file(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        let b = manager.find("b").unwrap();
        assert_eq!(manager[b].weight, -2.25);
        assert_eq!(manager[b].text, "about b");
        assert_eq!(manager[b].created, 1);
        assert!(manager.find("scratch").is_none());
    }

    #[test]
    fn multiple_files_remove_stale_entries() {
        let dir = tempdir().unwrap();
        let mut manager = ResourceManager::<Note>::new();
        note(&mut manager, "kept", 1.0);
        let gone = note(&mut manager, "gone", 2.0);
        manager.save(dir.path()).unwrap();
        assert!(dir.path().join("notes/gone.note.json").is_file());

        manager.destroy(gone);
        fs::write(dir.path().join("notes/readme.txt"), "keep me").unwrap();
        manager.save(dir.path()).unwrap();
        assert!(!dir.path().join("notes/gone.note.json").exists());
        assert!(dir.path().join("notes/kept.note.json").is_file());
        assert!(dir.path().join("notes/readme.txt").is_file());

        let mut reloaded = ResourceManager::<Note>::new();
        let handles = reloaded.load(dir.path()).unwrap();
        assert_eq!(handles.len(), 1);
        assert_eq!(reloaded.name(handles[0]), "kept");
    }

    #[test]
    fn names_with_separators_save_inside_the_directory() {
        let dir = tempdir().unwrap();
        let mut manager = ResourceManager::<Note>::new();
        note(&mut manager, "Group/Box", 1.0);
        note(&mut manager, "../escape", 2.0);
        manager.save(dir.path()).unwrap();
        manager.save(dir.path()).unwrap();
        assert!(dir.path().join("notes/Group_Box.note.json").is_file());
        assert!(dir.path().join("notes/.._escape.note.json").is_file());
        assert!(!dir.path().join("escape.note.json").exists());

        let mut reloaded = ResourceManager::<Note>::new();
        assert_eq!(reloaded.load(dir.path()).unwrap().len(), 2);
        let group = reloaded.find("Group/Box").unwrap();
        assert_eq!(reloaded[group].text, "about Group/Box");
    }

    #[test]
    fn duplicate_documents_load_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Note.manager.json");
        let documents = serde_json::json!([
            { "name": "twin", "properties": { "weight": 1.0 } },
            { "name": "twin", "properties": { "weight": 2.0 } },
            { "name": "solo", "properties": {} }
        ]);
        fs::write(&path, documents.to_string()).unwrap();

        let mut manager = ResourceManager::<Note>::new();
        let loaded = manager.load_from_single_file(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.iter().all(|&handle| manager.is_alive(handle)));
        let twin = manager.find("twin").unwrap();
        assert_eq!(manager[twin].weight, 2.0);
        assert_eq!(manager[twin].created, 1);
        assert_eq!(manager.active_count(), 2);
    }

    #[test]
    fn malformed_json_fails_the_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Note.manager.json");
        fs::write(&path, "[{\"name\": ").unwrap();
        let mut manager = ResourceManager::<Note>::new();
        let err = manager.load_from_single_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("malformed Note manager file"));
    }

    #[test]
    fn missing_storage_loads_nothing() {
        let dir = tempdir().unwrap();
        let mut manager = ResourceManager::<Note>::new();
        assert!(manager.load(dir.path()).unwrap().is_empty());
    }
}
