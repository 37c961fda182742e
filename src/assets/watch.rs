//! Recompile scheduling and source file change detection.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use anyhow::{anyhow, Result};
use fxhash::FxHashMap;
use parking_lot::Mutex;

use crate::data_model::DataModel;
use crate::dod::ResourceManager;
use crate::resources::{Asset, AssetRef, AssetType};
use crate::settings::Settings;

#[derive(Debug, Default)]
struct QueueState {
    assets: Vec<AssetRef>,
    deadline: Option<Instant>,
}

/// Deduplicated set of assets waiting to be compiled.
///
/// Cloning shares the queue, so a watcher thread can fill it while the
/// main loop drains it.
#[derive(Debug, Default)]
pub struct RecompileQueue {
    state: Arc<Mutex<QueueState>>,
}

impl Clone for RecompileQueue {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl RecompileQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `asset` unless it is already queued and (re)arms the timer to
    /// fire `delay` after `now`.
    pub fn enqueue(&self, asset: AssetRef, delay: Duration, now: Instant) {
        let mut state = self.state.lock();
        if !state.assets.contains(&asset) {
            state.assets.push(asset);
        }
        state.deadline = Some(now + delay);
    }

    /// Takes the whole batch once its deadline has passed.
    pub fn take_due(&self, now: Instant) -> Vec<AssetRef> {
        let mut state = self.state.lock();
        match state.deadline {
            Some(deadline) if deadline <= now => {
                state.deadline = None;
                std::mem::take(&mut state.assets)
            }
            _ => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().assets.is_empty()
    }
}

/// Source directory of an asset type, relative to the project root.
pub fn source_dir(settings: &Settings, asset_type: AssetType) -> Option<&Path> {
    match asset_type {
        AssetType::Mesh => Some(settings.mesh_source_dir.as_path()),
        AssetType::ColorTexture
        | AssetType::AlphaTexture
        | AssetType::NormalTexture
        | AssetType::HdrTexture => Some(settings.texture_source_dir.as_path()),
        AssetType::None => None,
    }
}

/// Maps watched source files to the assets declared for them.
#[derive(Debug, Default)]
pub struct AssetWatcher {
    assets_by_path: FxHashMap<PathBuf, Vec<AssetRef>>,
    /// Last seen modification time; `None` while the file is missing.
    modified: FxHashMap<PathBuf, Option<SystemTime>>,
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

impl AssetWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the watch list from the declared assets. Paths already
    /// watched keep their baseline, new paths start from their current state.
    pub fn rebuild(&mut self, project: &Path, settings: &Settings, assets: &ResourceManager<Asset>) {
        self.assets_by_path.clear();
        for (handle, asset) in assets.iter() {
            let Some(dir) = source_dir(settings, asset.asset_type) else {
                continue;
            };
            let path = project.join(dir).join(&asset.file_name);
            self.assets_by_path.entry(path).or_default().push(handle);
        }
        let previous = std::mem::take(&mut self.modified);
        for path in self.assets_by_path.keys() {
            let time = match previous.get(path) {
                Some(&time) => time,
                None => modified_time(path),
            };
            self.modified.insert(path.clone(), time);
        }
        log::debug!("Watching {} source file(s)", self.assets_by_path.len());
    }

    pub fn watched_paths(&self) -> impl Iterator<Item = &Path> + '_ {
        self.assets_by_path.keys().map(PathBuf::as_path)
    }

    /// Assets whose source is `path`.
    pub fn assets_for(&self, path: &Path) -> &[AssetRef] {
        self.assets_by_path
            .get(path)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Returns the watched files whose modification time changed since the
    /// last poll. Missing files are reported once they reappear.
    pub fn poll_changes(&mut self) -> Vec<PathBuf> {
        let mut changed = Vec::new();
        for path in self.assets_by_path.keys() {
            let time = modified_time(path);
            let previous = self.modified.insert(path.clone(), time).flatten();
            if time.is_some() && time != previous {
                changed.push(path.clone());
            }
        }
        changed.sort();
        changed
    }
}

/// Enqueues every asset declared for `path`. Returns how many were queued.
pub fn enqueue_changed(
    queue: &RecompileQueue,
    watcher: &AssetWatcher,
    path: &Path,
    delay: Duration,
    now: Instant,
) -> usize {
    let assets = watcher.assets_for(path);
    if assets.is_empty() {
        return 0;
    }
    log::info!("{} changed, recompiling {} asset(s)", path.display(), assets.len());
    for &asset in assets {
        queue.enqueue(asset, delay, now);
    }
    assets.len()
}

/// Background thread polling source files and filling a [`RecompileQueue`].
pub struct WatchThread {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<Result<()>>>,
}

impl WatchThread {
    pub fn spawn(
        model: DataModel,
        queue: RecompileQueue,
        project: PathBuf,
        settings: Settings,
        interval: Duration,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let thread = thread::spawn(move || {
            let mut watcher = AssetWatcher::new();
            while flag.load(Ordering::Acquire) {
                {
                    let registry = model.read();
                    watcher.rebuild(&project, &settings, registry.resources::<Asset>());
                }
                for path in watcher.poll_changes() {
                    enqueue_changed(
                        &queue,
                        &watcher,
                        &path,
                        settings.file_change_delay(),
                        Instant::now(),
                    );
                }
                thread::sleep(interval);
            }
            Ok(())
        });
        Self {
            running,
            thread: Some(thread),
        }
    }

    /// Stops polling and waits for the thread to exit.
    pub fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::Release);
        match self.thread.take() {
            Some(handle) => handle
                .join()
                .map_err(|panic| anyhow!("watch thread panicked: {:?}", panic))?,
            None => Ok(()),
        }
    }
}

impl Drop for WatchThread {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn asset(assets: &mut ResourceManager<Asset>, name: &str, file: &str, asset_type: AssetType) -> AssetRef {
        let handle = assets.create(name);
        assets[handle].file_name = file.into();
        assets[handle].asset_type = asset_type;
        handle
    }

    #[test]
    fn queue_deduplicates_and_waits_for_deadline() {
        let queue = RecompileQueue::new();
        let mut assets = ResourceManager::<Asset>::new();
        let a = assets.create("a");
        let b = assets.create("b");
        let start = Instant::now();
        queue.enqueue(a, Duration::from_millis(100), start);
        queue.enqueue(b, Duration::from_millis(100), start);
        queue.enqueue(a, Duration::from_millis(100), start);
        assert_eq!(queue.len(), 2);

        assert!(queue.take_due(start + Duration::from_millis(50)).is_empty());
        assert_eq!(queue.take_due(start + Duration::from_millis(100)), vec![a, b]);
        assert!(queue.is_empty());
    }

    #[test]
    fn clones_share_the_queue() {
        let queue = RecompileQueue::new();
        let mut assets = ResourceManager::<Asset>::new();
        let a = assets.create("a");
        let now = Instant::now();
        queue.clone().enqueue(a, Duration::ZERO, now);
        assert_eq!(queue.take_due(now), vec![a]);
    }

    #[test]
    fn assets_sharing_a_source_are_grouped() {
        let dir = tempdir().unwrap();
        let settings = Settings::default();
        let mut assets = ResourceManager::<Asset>::new();
        let rock = asset(&mut assets, "rock", "rock.fbx", AssetType::Mesh);
        let rock_lod = asset(&mut assets, "rock_lod", "rock.fbx", AssetType::Mesh);
        asset(&mut assets, "bark", "bark.tga", AssetType::ColorTexture);

        let mut watcher = AssetWatcher::new();
        watcher.rebuild(dir.path(), &settings, &assets);
        let path = dir.path().join("assets/meshes/rock.fbx");
        assert_eq!(watcher.assets_for(&path), &[rock, rock_lod]);
        assert!(watcher
            .assets_for(&dir.path().join("assets/textures/missing.tga"))
            .is_empty());
    }

    #[test]
    fn poll_reports_files_that_appear() {
        let dir = tempdir().unwrap();
        let settings = Settings::default();
        let mut assets = ResourceManager::<Asset>::new();
        asset(&mut assets, "bark", "bark.tga", AssetType::ColorTexture);
        let mut watcher = AssetWatcher::new();
        watcher.rebuild(dir.path(), &settings, &assets);
        assert!(watcher.poll_changes().is_empty());

        let textures = dir.path().join("assets/textures");
        fs::create_dir_all(&textures).unwrap();
        fs::write(textures.join("bark.tga"), b"tga").unwrap();
        assert_eq!(watcher.poll_changes(), vec![textures.join("bark.tga")]);
        assert!(watcher.poll_changes().is_empty());
    }

    #[test]
    fn rebuilding_keeps_missing_files_pending() {
        let dir = tempdir().unwrap();
        let settings = Settings::default();
        let mut assets = ResourceManager::<Asset>::new();
        asset(&mut assets, "bark", "bark.tga", AssetType::ColorTexture);
        let mut watcher = AssetWatcher::new();
        watcher.rebuild(dir.path(), &settings, &assets);
        assert!(watcher.poll_changes().is_empty());

        let textures = dir.path().join("assets/textures");
        fs::create_dir_all(&textures).unwrap();
        fs::write(textures.join("bark.tga"), b"tga").unwrap();
        watcher.rebuild(dir.path(), &settings, &assets);
        assert_eq!(watcher.poll_changes(), vec![textures.join("bark.tga")]);

        fs::remove_file(textures.join("bark.tga")).unwrap();
        assert!(watcher.poll_changes().is_empty());
        watcher.rebuild(dir.path(), &settings, &assets);
        fs::write(textures.join("bark.tga"), b"tga").unwrap();
        watcher.rebuild(dir.path(), &settings, &assets);
        assert_eq!(watcher.poll_changes(), vec![textures.join("bark.tga")]);
    }

    #[test]
    fn sources_declared_later_start_from_their_current_state() {
        let dir = tempdir().unwrap();
        let settings = Settings::default();
        let textures = dir.path().join("assets/textures");
        fs::create_dir_all(&textures).unwrap();
        fs::write(textures.join("moss.tga"), b"tga").unwrap();

        let mut assets = ResourceManager::<Asset>::new();
        let mut watcher = AssetWatcher::new();
        watcher.rebuild(dir.path(), &settings, &assets);
        asset(&mut assets, "moss", "moss.tga", AssetType::ColorTexture);
        watcher.rebuild(dir.path(), &settings, &assets);
        assert!(watcher.poll_changes().is_empty());
    }

    #[test]
    fn watch_thread_queues_changed_sources() {
        use crate::registry::ManagerRegistry;

        let dir = tempdir().unwrap();
        let settings = Settings {
            file_change_delay_ms: 0,
            ..Settings::default()
        };
        let mut registry = ManagerRegistry::new();
        registry.register_resource(ResourceManager::<Asset>::new());
        let bark = asset(
            registry.resources_mut::<Asset>(),
            "bark",
            "bark.tga",
            AssetType::ColorTexture,
        );
        let model = DataModel::new(registry);
        let queue = RecompileQueue::new();
        let mut watch = WatchThread::spawn(
            model,
            queue.clone(),
            dir.path().to_path_buf(),
            settings,
            Duration::from_millis(5),
        );

        thread::sleep(Duration::from_millis(50));
        let textures = dir.path().join("assets/textures");
        fs::create_dir_all(&textures).unwrap();
        fs::write(textures.join("bark.tga"), b"tga").unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while queue.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        watch.stop().unwrap();
        assert_eq!(queue.take_due(Instant::now()), vec![bark]);
    }
}
