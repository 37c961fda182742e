//! Source asset import and compilation.

pub mod compile;
pub mod hull;
pub mod mesh_import;
pub mod obj;
pub mod optimizer;
pub mod physics;
pub mod scene;
pub mod texture;
pub mod watch;

pub use compile::{invalidate_bound_calls, AssetPipeline, CompileReport};
pub use mesh_import::{import_meshes, ImportedMesh, FALLBACK_MATERIAL};
pub use obj::{load_obj_from_str, ObjSceneLoader};
pub use physics::{
    cook_physics_meshes, BinaryCooking, ConvexFlags, CookError, CookReport, PhysicsCooking,
};
pub use scene::{ConverterSceneLoader, ImportScene, SceneLoader, XmlSceneLoader};
pub use texture::{import_texture, BlockCompression, NvCompress, TextureCompressor};
pub use watch::{AssetWatcher, RecompileQueue, WatchThread};
