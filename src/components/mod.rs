//! Component kinds attached to entities.

mod light;
mod mesh;
mod specular_probe;

pub use light::Light;
pub use mesh::MeshComponent;
pub use specular_probe::{sort_by_priority, SpecularProbe};

use crate::dod::Handle;

pub type LightRef = Handle<Light>;
pub type MeshComponentRef = Handle<MeshComponent>;
pub type SpecularProbeRef = Handle<SpecularProbe>;
