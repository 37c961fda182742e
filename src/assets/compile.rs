//! Asset declaration and batch compilation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};

use super::mesh_import::import_meshes;
use super::obj::ObjSceneLoader;
use super::physics::{cook_physics_meshes, BinaryCooking, CookReport, PhysicsCooking};
use super::scene::{ConverterSceneLoader, SceneLoader, XmlSceneLoader};
use super::texture::{import_texture, NvCompress, TextureCompressor};
use super::watch::{enqueue_changed, source_dir, AssetWatcher, RecompileQueue};
use crate::dod::{Resource, Storage};
use crate::name::Name;
use crate::registry::ManagerRegistry;
use crate::resources::{
    Asset, AssetRef, AssetType, ComputeCall, DrawCall, Image, ImageRef, Material, Mesh, MeshRef,
};
use crate::settings::Settings;

/// Outcome of one compile batch.
#[derive(Debug, Default)]
pub struct CompileReport {
    pub meshes: Vec<MeshRef>,
    pub images: Vec<ImageRef>,
    /// Assets whose import failed.
    pub failed: Vec<Name>,
    pub invalidated_draw_calls: usize,
    pub invalidated_compute_calls: usize,
    pub cook: Option<CookReport>,
}

/// Drives the importers for declared assets.
pub struct AssetPipeline {
    project: PathBuf,
    settings: Settings,
    loaders: Vec<Box<dyn SceneLoader>>,
    compressor: Box<dyn TextureCompressor>,
    cooker: Option<Box<dyn PhysicsCooking>>,
    queue: RecompileQueue,
    watcher: AssetWatcher,
}

impl AssetPipeline {
    pub fn new(project: impl Into<PathBuf>, settings: Settings) -> Self {
        let mut loaders: Vec<Box<dyn SceneLoader>> =
            vec![Box::new(XmlSceneLoader), Box::new(ObjSceneLoader)];
        if let Some(converter) = &settings.scene_converter {
            loaders.push(Box::new(ConverterSceneLoader::new(converter.clone())));
        }
        let compressor = Box::new(NvCompress::new(settings.texture_compressor.clone()));
        let cooker: Option<Box<dyn PhysicsCooking>> = settings
            .cook_physics
            .then(|| Box::new(BinaryCooking::default()) as Box<dyn PhysicsCooking>);
        Self {
            project: project.into(),
            settings,
            loaders,
            compressor,
            cooker,
            queue: RecompileQueue::new(),
            watcher: AssetWatcher::new(),
        }
    }

    pub fn with_compressor(mut self, compressor: Box<dyn TextureCompressor>) -> Self {
        self.compressor = compressor;
        self
    }

    pub fn with_cooker(mut self, cooker: Option<Box<dyn PhysicsCooking>>) -> Self {
        self.cooker = cooker;
        self
    }

    pub fn with_loader(mut self, loader: Box<dyn SceneLoader>) -> Self {
        self.loaders.push(loader);
        self
    }

    pub fn project(&self) -> &Path {
        &self.project
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn managers_dir(&self) -> PathBuf {
        self.project.join(&self.settings.managers_dir)
    }

    /// Shared handle to the recompile queue.
    pub fn queue(&self) -> RecompileQueue {
        self.queue.clone()
    }

    /// Declares a source file as an asset, copying it into the source
    /// directory of its type when it lives elsewhere. A file that is
    /// already declared returns the existing asset.
    pub fn declare_asset(&self, registry: &mut ManagerRegistry, path: &Path) -> Result<AssetRef> {
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project.join(path)
        };
        let asset_type = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map_or(AssetType::None, AssetType::from_extension);
        let Some(dir) = source_dir(&self.settings, asset_type) else {
            bail!("unsupported asset file {}", path.display());
        };
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow!("asset path {} has no file name", path.display()))?
            .to_string();
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| anyhow!("asset path {} has no file name", path.display()))?;

        if let Some(existing) = registry.resources::<Asset>().find(name) {
            log::debug!("Asset `{name}` is already declared");
            return Ok(existing);
        }

        let target_dir = self.project.join(dir);
        let target = target_dir.join(&file_name);
        if target != path {
            fs::create_dir_all(&target_dir)
                .with_context(|| format!("failed to create {}", target_dir.display()))?;
            fs::copy(&path, &target).with_context(|| {
                format!("failed to copy {} to {}", path.display(), target.display())
            })?;
        }

        let assets = registry.resources_mut::<Asset>();
        let handle = assets.create(name);
        assets[handle].file_name = file_name;
        assets[handle].asset_type = asset_type;
        assets.create_resources(&[handle]);
        if let Storage::MultipleFiles {
            directory,
            extension,
        } = Asset::STORAGE
        {
            assets.save_resource_to_file(handle, &self.managers_dir().join(directory), extension)?;
        }
        log::info!("Declared {asset_type:?} asset `{name}`");
        Ok(handle)
    }

    /// Compiles a batch of assets. Failures are logged and reported per
    /// asset; dependent draw and compute calls are recreated once at the
    /// end of the batch.
    pub fn compile_assets(
        &self,
        registry: &mut ManagerRegistry,
        assets: &[AssetRef],
    ) -> CompileReport {
        let mut report = CompileReport::default();
        let managers_dir = self.managers_dir();

        for &asset in assets {
            let Some(declaration) = registry.resources::<Asset>().get(asset).cloned() else {
                log::warn!("Skipping compile of destroyed asset {asset:?}");
                continue;
            };
            let name = registry.resources::<Asset>().name(asset).clone();
            let Some(dir) = source_dir(&self.settings, declaration.asset_type) else {
                log::warn!("Asset `{name}` has no type, skipping");
                continue;
            };
            let source = self.project.join(dir).join(&declaration.file_name);

            let result = if declaration.asset_type == AssetType::Mesh {
                self.compile_mesh(registry, &source, &managers_dir)
                    .map(|meshes| report.meshes.extend(meshes))
            } else {
                import_texture(
                    registry,
                    self.compressor.as_ref(),
                    &source,
                    declaration.asset_type,
                    &self.project.join(&self.settings.media_texture_dir),
                )
                .map(|image| report.images.push(image))
            };
            if let Err(err) = result {
                log::error!("Failed to compile asset `{name}`: {err:?}");
                report.failed.push(name);
            }
        }

        if !report.images.is_empty() {
            if let Err(err) = registry.resources::<Image>().save(&managers_dir) {
                log::error!("Failed to save images: {err:?}");
            }
        }

        if let Some(cooker) = &self.cooker {
            if !report.meshes.is_empty() {
                let out_dir = self.project.join(&self.settings.media_physics_dir);
                match cook_physics_meshes(
                    registry.resources::<Mesh>(),
                    &report.meshes,
                    cooker.as_ref(),
                    &out_dir,
                ) {
                    Ok(cook) => report.cook = Some(cook),
                    Err(err) => log::error!("Physics cooking failed: {err:?}"),
                }
            }
        }

        let (draw_calls, compute_calls) = invalidate_bound_calls(registry, &report.images);
        report.invalidated_draw_calls = draw_calls;
        report.invalidated_compute_calls = compute_calls;
        report
    }

    fn compile_mesh(
        &self,
        registry: &mut ManagerRegistry,
        source: &Path,
        managers_dir: &Path,
    ) -> Result<Vec<MeshRef>> {
        let extension = source
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let loader = self
            .loaders
            .iter()
            .find(|loader| loader.extensions().contains(&extension.as_str()))
            .ok_or_else(|| anyhow!("no scene loader for {}", source.display()))?;
        let scene = loader.load(source)?;
        let meshes = import_meshes(registry, &scene);
        if meshes.is_empty() {
            bail!("{} contains no importable meshes", source.display());
        }

        if let Storage::MultipleFiles {
            directory,
            extension,
        } = Mesh::STORAGE
        {
            let mesh_dir = managers_dir.join(directory);
            let manager = registry.resources::<Mesh>();
            for &mesh in &meshes {
                manager.save_resource_to_file(mesh, &mesh_dir, extension)?;
            }
        }
        registry.resources::<Material>().save(managers_dir)?;
        Ok(meshes)
    }

    /// Schedules `asset` for compilation after the short request delay.
    pub fn request_compile(&self, asset: AssetRef, now: Instant) {
        self.queue
            .enqueue(asset, self.settings.compile_request_delay(), now);
    }

    /// Schedules every asset compiled from `path`. Returns how many were
    /// queued.
    pub fn on_file_changed(&self, path: &Path, now: Instant) -> usize {
        enqueue_changed(
            &self.queue,
            &self.watcher,
            path,
            self.settings.file_change_delay(),
            now,
        )
    }

    /// Polls watched sources and queues the changed ones.
    pub fn poll_changes(&mut self, now: Instant) -> usize {
        let changed = self.watcher.poll_changes();
        changed
            .iter()
            .map(|path| self.on_file_changed(path, now))
            .sum()
    }

    pub fn rebuild_watch_list(&mut self, registry: &ManagerRegistry) {
        self.watcher
            .rebuild(&self.project, &self.settings, registry.resources::<Asset>());
    }

    /// Compiles the queued batch once its delay expired.
    pub fn tick(&mut self, registry: &mut ManagerRegistry, now: Instant) -> Option<CompileReport> {
        let batch = self.queue.take_due(now);
        if batch.is_empty() {
            return None;
        }
        let report = self.compile_assets(registry, &batch);
        self.rebuild_watch_list(registry);
        Some(report)
    }
}

/// Recreates every draw and compute call bound to one of `images`.
///
/// Returns the number of draw and compute calls recreated.
pub fn invalidate_bound_calls(
    registry: &mut ManagerRegistry,
    images: &[ImageRef],
) -> (usize, usize) {
    if images.is_empty() {
        return (0, 0);
    }
    let draw_calls = registry.resources_mut::<DrawCall>();
    let stale: Vec<_> = draw_calls
        .iter()
        .filter(|(_, call)| images.iter().any(|&image| call.binds(image)))
        .map(|(handle, _)| handle)
        .collect();
    draw_calls.destroy_resources(&stale);
    draw_calls.create_resources(&stale);
    let draw_count = stale.len();

    let compute_calls = registry.resources_mut::<ComputeCall>();
    let stale: Vec<_> = compute_calls
        .iter()
        .filter(|(_, call)| images.iter().any(|&image| call.binds(image)))
        .map(|(handle, _)| handle)
        .collect();
    compute_calls.destroy_resources(&stale);
    compute_calls.create_resources(&stale);

    if draw_count + stale.len() > 0 {
        log::info!(
            "Recreated {draw_count} draw call(s) and {} compute call(s)",
            stale.len()
        );
    }
    (draw_count, stale.len())
}
