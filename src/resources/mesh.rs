use glam::{Vec2, Vec3, Vec4};
use serde::Serialize;

use crate::dod::{Resource, Storage};
use crate::math::Aabb;
use crate::name::Name;
use crate::property::{
    DescriptorError, DescriptorReader, DescriptorWriter, Editor, Property, PropertyValue,
};

/// Imported geometry, one entry per sub-mesh in every array.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub positions_per_sub_mesh: Vec<Vec<Vec3>>,
    pub uv0s_per_sub_mesh: Vec<Vec<Vec2>>,
    pub normals_per_sub_mesh: Vec<Vec<Vec3>>,
    pub tangents_per_sub_mesh: Vec<Vec<Vec3>>,
    pub binormals_per_sub_mesh: Vec<Vec<Vec3>>,
    pub vertex_colors_per_sub_mesh: Vec<Vec<Vec4>>,
    pub indices_per_sub_mesh: Vec<Vec<u32>>,
    pub material_names_per_sub_mesh: Vec<Name>,
    /// Runtime only, derived in `create_resources`.
    pub aabb_per_sub_mesh: Vec<Aabb>,
}

impl Mesh {
    pub fn sub_mesh_count(&self) -> usize {
        self.positions_per_sub_mesh.len()
    }

    pub fn vertex_count(&self) -> usize {
        self.positions_per_sub_mesh.iter().map(Vec::len).sum()
    }

    pub fn index_count(&self) -> usize {
        self.indices_per_sub_mesh.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.vertex_count() == 0 || self.index_count() == 0
    }

    /// Positions and indices of all sub-meshes in one buffer pair.
    pub fn merged_geometry(&self) -> (Vec<Vec3>, Vec<u32>) {
        let mut positions = Vec::with_capacity(self.vertex_count());
        let mut indices = Vec::with_capacity(self.index_count());
        for (sub_positions, sub_indices) in self
            .positions_per_sub_mesh
            .iter()
            .zip(&self.indices_per_sub_mesh)
        {
            let base = positions.len() as u32;
            positions.extend_from_slice(sub_positions);
            indices.extend(sub_indices.iter().map(|index| base + index));
        }
        (positions, indices)
    }

    /// Bounds over every sub-mesh.
    pub fn bounds(&self) -> Aabb {
        self.positions_per_sub_mesh
            .iter()
            .map(|positions| Aabb::from_points(positions))
            .fold(Aabb::EMPTY, Aabb::union)
    }

    /// Checks that the per-vertex arrays agree and indices are in range.
    pub fn is_consistent(&self) -> bool {
        let count = self.sub_mesh_count();
        let same_len = self.uv0s_per_sub_mesh.len() == count
            && self.normals_per_sub_mesh.len() == count
            && self.tangents_per_sub_mesh.len() == count
            && self.binormals_per_sub_mesh.len() == count
            && self.vertex_colors_per_sub_mesh.len() == count
            && self.indices_per_sub_mesh.len() == count
            && self.material_names_per_sub_mesh.len() == count;
        same_len
            && (0..count).all(|sub| {
                let vertices = self.positions_per_sub_mesh[sub].len();
                let indices = &self.indices_per_sub_mesh[sub];
                self.uv0s_per_sub_mesh[sub].len() == vertices
                    && self.normals_per_sub_mesh[sub].len() == vertices
                    && self.tangents_per_sub_mesh[sub].len() == vertices
                    && self.binormals_per_sub_mesh[sub].len() == vertices
                    && self.vertex_colors_per_sub_mesh[sub].len() == vertices
                    && indices.len() % 3 == 0
                    && indices.iter().all(|&index| (index as usize) < vertices)
            })
    }
}

fn add_array<T: Serialize>(out: &mut DescriptorWriter<'_>, key: &str, value: &T) {
    match serde_json::to_value(value) {
        Ok(value) => out.add_raw(key, value),
        Err(err) => log::error!("Failed to encode mesh property `{key}`: {err}"),
    }
}

fn count_property(value: usize) -> Property {
    Property::new("Mesh", Editor::Uint, PropertyValue::Uint(value as u32)).read_only()
}

impl Resource for Mesh {
    const KIND: &'static str = "Mesh";
    const CAPACITY: u32 = 4096;
    const STORAGE: Storage = Storage::MultipleFiles {
        directory: "meshes",
        extension: ".mesh.json",
    };

    fn compile_descriptor(&self, out: &mut DescriptorWriter<'_>) {
        if out.generate_desc() {
            out.add("subMeshCount", count_property(self.sub_mesh_count()));
            out.add("vertexCount", count_property(self.vertex_count()));
            out.add("indexCount", count_property(self.index_count()));
            return;
        }
        add_array(out, "positionsPerSubMesh", &self.positions_per_sub_mesh);
        add_array(out, "uv0sPerSubMesh", &self.uv0s_per_sub_mesh);
        add_array(out, "normalsPerSubMesh", &self.normals_per_sub_mesh);
        add_array(out, "tangentsPerSubMesh", &self.tangents_per_sub_mesh);
        add_array(out, "binormalsPerSubMesh", &self.binormals_per_sub_mesh);
        add_array(out, "vertexColorsPerSubMesh", &self.vertex_colors_per_sub_mesh);
        add_array(out, "indicesPerSubMesh", &self.indices_per_sub_mesh);
        add_array(out, "materialNamesPerSubMesh", &self.material_names_per_sub_mesh);
    }

    fn init_from_descriptor(&mut self, reader: &DescriptorReader<'_>) -> Result<(), DescriptorError> {
        reader.raw("positionsPerSubMesh", &mut self.positions_per_sub_mesh)?;
        reader.raw("uv0sPerSubMesh", &mut self.uv0s_per_sub_mesh)?;
        reader.raw("normalsPerSubMesh", &mut self.normals_per_sub_mesh)?;
        reader.raw("tangentsPerSubMesh", &mut self.tangents_per_sub_mesh)?;
        reader.raw("binormalsPerSubMesh", &mut self.binormals_per_sub_mesh)?;
        reader.raw("vertexColorsPerSubMesh", &mut self.vertex_colors_per_sub_mesh)?;
        reader.raw("indicesPerSubMesh", &mut self.indices_per_sub_mesh)?;
        reader.raw("materialNamesPerSubMesh", &mut self.material_names_per_sub_mesh)
    }

    fn create_resources(&mut self, name: &Name) {
        self.aabb_per_sub_mesh = self
            .positions_per_sub_mesh
            .iter()
            .map(|positions| Aabb::from_points(positions))
            .collect();
        if !self.is_consistent() {
            log::warn!("Mesh `{name}` has inconsistent sub-mesh arrays");
        }
    }

    fn destroy_resources(&mut self) {
        self.aabb_per_sub_mesh.clear();
    }
}
