use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};

use crate::assets::{AssetPipeline, CompileReport};
use crate::components::{Light, MeshComponent, SpecularProbe};
use crate::data_model::DataModel;
use crate::dod::{ComponentManager, ResourceManager};
use crate::registry::ManagerRegistry;
use crate::resources::{
    Asset, AssetRef, ComputeCall, DrawCall, Image, Material, Mesh, PostEffect, Script,
};
use crate::settings::Settings;

/// Image used when a material names a texture that does not exist.
pub const DEFAULT_IMAGE: &str = "checkerboard";

/// One project: its settings, managers and asset pipeline.
pub struct Application {
    model: DataModel,
    pipeline: AssetPipeline,
}

impl Application {
    /// Builds the registry with every resource and component kind.
    pub fn init_managers() -> ManagerRegistry {
        let mut registry = ManagerRegistry::new();
        registry.register_resource(ResourceManager::<Asset>::new());
        registry.register_resource(ResourceManager::<Mesh>::new());
        registry.register_resource(ResourceManager::<Material>::new());
        let mut images = ResourceManager::<Image>::new();
        images.set_default_resource(DEFAULT_IMAGE);
        registry.register_resource(images);
        registry.register_resource(ResourceManager::<DrawCall>::new());
        registry.register_resource(ResourceManager::<ComputeCall>::new());
        registry.register_resource(ResourceManager::<Script>::new());
        registry.register_resource(ResourceManager::<PostEffect>::new());

        registry.register_component(ComponentManager::<MeshComponent>::new());
        registry.register_component(ComponentManager::<Light>::new());
        registry.register_component(ComponentManager::<SpecularProbe>::new());
        registry
    }

    /// Opens the project at `project`, reading its `settings.json`.
    pub fn open(project: impl Into<PathBuf>) -> Result<Self> {
        let project = project.into();
        let settings = Settings::load(&project)
            .with_context(|| format!("failed to load settings of {}", project.display()))?;
        Ok(Self::with_settings(project, settings))
    }

    pub fn with_settings(project: impl Into<PathBuf>, settings: Settings) -> Self {
        Self {
            model: DataModel::new(Self::init_managers()),
            pipeline: AssetPipeline::new(project, settings),
        }
    }

    pub fn model(&self) -> &DataModel {
        &self.model
    }

    pub fn pipeline(&self) -> &AssetPipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut AssetPipeline {
        &mut self.pipeline
    }

    pub fn project(&self) -> &Path {
        self.pipeline.project()
    }

    /// Loads every resource kind from the managers directory.
    pub fn load_managers(&mut self) -> Result<usize> {
        let managers_dir = self.pipeline.managers_dir();
        let mut registry = self.model.write();
        let count = registry
            .load_all(&managers_dir)
            .with_context(|| format!("failed to load managers from {}", managers_dir.display()))?;
        self.pipeline.rebuild_watch_list(&registry);
        Ok(count)
    }

    pub fn save_managers(&self) -> Result<()> {
        let managers_dir = self.pipeline.managers_dir();
        self.model
            .read()
            .save_all(&managers_dir)
            .with_context(|| format!("failed to save managers to {}", managers_dir.display()))
    }

    pub fn declare_asset(&mut self, path: &Path) -> Result<AssetRef> {
        let mut registry = self.model.write();
        let asset = self.pipeline.declare_asset(&mut registry, path)?;
        self.pipeline.rebuild_watch_list(&registry);
        Ok(asset)
    }

    /// Compiles every declared asset in one batch.
    pub fn compile_all(&mut self) -> CompileReport {
        let mut registry = self.model.write();
        let assets = registry.resources::<Asset>().handles();
        let report = self.pipeline.compile_assets(&mut registry, &assets);
        self.pipeline.rebuild_watch_list(&registry);
        report
    }

    /// Runs one pump step: compiles the queued batch when it is due and
    /// saves the managers afterwards.
    pub fn tick(&mut self, now: Instant) -> Result<Option<CompileReport>> {
        let report = {
            let mut registry = self.model.write();
            self.pipeline.tick(&mut registry, now)
        };
        if report.is_some() {
            self.save_managers()?;
        }
        Ok(report)
    }

    /// Human readable listing of the declared assets and meshes.
    pub fn summary(&self) -> String {
        let registry = self.model.read();
        let mut out = String::new();
        let assets = registry.resources::<Asset>();
        let _ = writeln!(out, "Loaded {} asset(s)", assets.active_count());

        let meshes = registry.resources::<Mesh>();
        let mut handles = meshes.handles();
        handles.sort_by(|a, b| meshes.name(*a).cmp(meshes.name(*b)));
        for handle in handles {
            let mesh = &meshes[handle];
            let _ = writeln!(
                out,
                " - {}: {} sub-mesh(es), {} vertices, {} indices",
                meshes.name(handle),
                mesh.sub_mesh_count(),
                mesh.vertex_count(),
                mesh.index_count()
            );
        }
        out
    }
}

pub fn print_compile_report(registry: &ManagerRegistry, report: &CompileReport) {
    let meshes = registry.resources::<Mesh>();
    for &mesh in &report.meshes {
        println!("Compiled mesh {}", meshes.name(mesh));
    }
    let images = registry.resources::<Image>();
    for &image in &report.images {
        println!("Compiled image {}", images.name(image));
    }
    if let Some(cook) = &report.cook {
        println!(
            "Cooked {} physics mesh(es), {} from bounds, {} skipped",
            cook.cooked.len(),
            cook.fallback.len(),
            cook.skipped.len()
        );
    }
    for name in &report.failed {
        println!("Failed to compile {name}");
    }
}
