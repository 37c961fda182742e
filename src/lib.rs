//! Resource pools and the asset compilation pipeline of the Crystal
//! toolchain.
//!
//! Resources and components live in fixed-capacity pools addressed by
//! generation-stamped handles. Every kind describes its fields as typed
//! properties, which drive both the JSON manager files and generic tooling
//! through the [`ManagerRegistry`]. The [`assets`] module turns source
//! meshes and textures into those resources.  Rendering is kept outside of
//! the crate so the pipeline runs in headless tools.

pub mod algorithm;
pub mod app;
pub mod assets;
pub mod components;
pub mod data_model;
pub mod dod;
pub mod math;
pub mod name;
pub mod property;
pub mod registry;
pub mod resources;
pub mod settings;

pub use app::Application;
pub use assets::{AssetPipeline, CompileReport};
pub use data_model::DataModel;
pub use dod::{Handle, Ref, Resource, ResourceManager};
pub use name::Name;
pub use registry::{ManagerRegistry, RegistryError};
pub use settings::Settings;
