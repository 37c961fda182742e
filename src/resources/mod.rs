//! Resource kinds managed by the registry.

mod asset;
mod draw_call;
mod image;
mod material;
mod mesh;
mod post_effect;
mod script;

pub use asset::{Asset, AssetType};
pub use draw_call::{ComputeCall, DrawCall, MaterialPass};
pub use image::{Image, ImageFormat, ImageType};
pub use material::{Material, MATERIAL_PASSES};
pub use mesh::Mesh;
pub use post_effect::PostEffect;
pub use script::Script;

use crate::dod::Handle;

pub type AssetRef = Handle<Asset>;
pub type ComputeCallRef = Handle<ComputeCall>;
pub type DrawCallRef = Handle<DrawCall>;
pub type ImageRef = Handle<Image>;
pub type MaterialRef = Handle<Material>;
pub type MeshRef = Handle<Mesh>;
pub type PostEffectRef = Handle<PostEffect>;
pub type ScriptRef = Handle<Script>;
