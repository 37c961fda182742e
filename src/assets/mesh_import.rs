//! Converts source scenes into [`Mesh`] resources.
//!
//! Geometry for every mesh is computed before the registry is touched, so a
//! failed import leaves the pools untouched.

use fxhash::FxHashMap;
use glam::{Mat4, Vec2, Vec3, Vec4};

use super::optimizer::{optimize_faces, DEFAULT_CACHE_SIZE};
use super::scene::{ImportScene, MaterialMapping, NodeAttribute, SourceMesh, Triangle};
use crate::components::MeshComponent;
use crate::name::Name;
use crate::registry::ManagerRegistry;
use crate::resources::{Material, Mesh, MeshRef};

/// Material name used when a node lists fewer materials than its mesh uses.
pub const FALLBACK_MATERIAL: &str = "default";

const DEFAULT_UV: Vec2 = Vec2::ZERO;
const DEFAULT_NORMAL: Vec3 = Vec3::Y;
const DEFAULT_TANGENT: Vec3 = Vec3::Z;
const DEFAULT_BINORMAL: Vec3 = Vec3::X;
const DEFAULT_COLOR: Vec4 = Vec4::ONE;

/// Fully expanded vertex.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub position: Vec3,
    pub uv0: Vec2,
    pub normal: Vec3,
    pub tangent: Vec3,
    pub binormal: Vec3,
    pub color: Vec4,
}

impl Vertex {
    /// Exact bit pattern of every attribute, used as the dedup key.
    fn key(&self) -> [u32; 18] {
        let mut key = [0u32; 18];
        let floats = self
            .position
            .to_array()
            .into_iter()
            .chain(self.uv0.to_array())
            .chain(self.normal.to_array())
            .chain(self.tangent.to_array())
            .chain(self.binormal.to_array())
            .chain(self.color.to_array());
        for (slot, value) in key.iter_mut().zip(floats) {
            *slot = value.to_bits();
        }
        key
    }
}

/// One sub-mesh before deduplication.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpandedSubMesh {
    pub material_name: Name,
    pub vertices: Vec<Vertex>,
}

/// A deduplicated sub-mesh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexedSubMesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

/// Merges identical vertices. The first occurrence keeps its place; later
/// duplicates are remapped onto it.
pub fn deduplicate(expanded: &[Vertex]) -> IndexedSubMesh {
    let mut lookup: FxHashMap<[u32; 18], u32> = FxHashMap::default();
    let mut result = IndexedSubMesh {
        vertices: Vec::new(),
        indices: Vec::with_capacity(expanded.len()),
    };
    for vertex in expanded {
        let next = result.vertices.len() as u32;
        let index = *lookup.entry(vertex.key()).or_insert_with(|| {
            result.vertices.push(*vertex);
            next
        });
        result.indices.push(index);
    }
    result
}

/// Geometry of one imported mesh, ready to be written to the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedMesh {
    pub name: Name,
    pub mesh: Mesh,
}

/// Walks the scene and builds every mesh it contains.
///
/// Meshes that produce no triangles, or that use an unsupported material
/// mapping, are logged and skipped.
pub fn build_meshes(scene: &ImportScene) -> Vec<ImportedMesh> {
    let mut meshes = Vec::new();
    for (index, global) in scene.walk() {
        let node = &scene.nodes[index];
        let candidates: Vec<&SourceMesh> = node
            .attributes
            .iter()
            .filter_map(|attribute| match attribute {
                NodeAttribute::Mesh(mesh) => Some(mesh),
                NodeAttribute::Other(_) => None,
            })
            .collect();
        let Some(source) = candidates
            .iter()
            .find(|mesh| mesh.is_triangle_mesh())
            .or_else(|| candidates.first())
        else {
            continue;
        };

        if let MaterialMapping::Unsupported(mode) = &source.material_mapping {
            log::error!(
                "Mesh `{}` uses unsupported material mapping `{mode}`, skipping",
                node.name
            );
            continue;
        }

        let (triangles, bad) = source.triangles();
        if bad > 0 {
            log::warn!("Removed {bad} bad polygon(s) from mesh `{}`", node.name);
        }
        if triangles.is_empty() {
            log::error!("Mesh `{}` has no triangles, skipping", node.name);
            continue;
        }

        let sub_meshes = expand(source, &triangles, &node.materials, global);
        let mut mesh = Mesh::default();
        for sub_mesh in sub_meshes {
            let indexed = deduplicate(&sub_mesh.vertices);
            let indices = optimize_faces(
                &indexed.indices,
                indexed.vertices.len() as u32,
                DEFAULT_CACHE_SIZE,
            );
            push_sub_mesh(&mut mesh, sub_mesh.material_name, indexed.vertices, indices);
        }
        log::debug!(
            "Built mesh `{}`: {} sub-mesh(es), {} vertices, {} indices",
            node.name,
            mesh.sub_mesh_count(),
            mesh.vertex_count(),
            mesh.index_count()
        );
        meshes.push(ImportedMesh {
            name: Name::new(&node.name),
            mesh,
        });
    }
    meshes
}

fn push_sub_mesh(mesh: &mut Mesh, material_name: Name, vertices: Vec<Vertex>, indices: Vec<u32>) {
    mesh.positions_per_sub_mesh
        .push(vertices.iter().map(|v| v.position).collect());
    mesh.uv0s_per_sub_mesh.push(vertices.iter().map(|v| v.uv0).collect());
    mesh.normals_per_sub_mesh
        .push(vertices.iter().map(|v| v.normal).collect());
    mesh.tangents_per_sub_mesh
        .push(vertices.iter().map(|v| v.tangent).collect());
    mesh.binormals_per_sub_mesh
        .push(vertices.iter().map(|v| v.binormal).collect());
    mesh.vertex_colors_per_sub_mesh
        .push(vertices.iter().map(|v| v.color).collect());
    mesh.indices_per_sub_mesh.push(indices);
    mesh.material_names_per_sub_mesh.push(material_name);
}

/// Buckets triangles into sub-meshes by material and expands every corner
/// into a full vertex in world space.
pub fn expand(
    source: &SourceMesh,
    triangles: &[Triangle],
    materials: &[String],
    global: Mat4,
) -> Vec<ExpandedSubMesh> {
    let (_, rotation, _) = global.to_scale_rotation_translation();
    let orient = |v: Vec3| (rotation * v).normalize_or_zero();
    let generate_tangents = source.uv0.is_some() && source.tangents.is_none();

    let mut slots: FxHashMap<u32, usize> = FxHashMap::default();
    let mut sub_meshes: Vec<ExpandedSubMesh> = Vec::new();

    for triangle in triangles {
        let material = source.material_index(triangle.polygon).unwrap_or(0);
        let slot = *slots.entry(material).or_insert_with(|| {
            let name = materials
                .get(material as usize)
                .map(String::as_str)
                .unwrap_or(FALLBACK_MATERIAL);
            sub_meshes.push(ExpandedSubMesh {
                material_name: Name::new(name),
                vertices: Vec::new(),
            });
            sub_meshes.len() - 1
        });

        let mut corners = [Vertex {
            position: Vec3::ZERO,
            uv0: DEFAULT_UV,
            normal: DEFAULT_NORMAL,
            tangent: DEFAULT_TANGENT,
            binormal: DEFAULT_BINORMAL,
            color: DEFAULT_COLOR,
        }; 3];
        for (vertex, &corner) in corners.iter_mut().zip(&triangle.corners) {
            let polygon = triangle.polygon;
            let point = source.control_points[corner.control_point as usize];
            vertex.position = global.transform_point3(point);
            if let Some(uv) = source.uv0.as_ref().and_then(|l| l.get(corner, polygon)) {
                vertex.uv0 = uv;
            }
            if let Some(n) = source.normals.as_ref().and_then(|l| l.get(corner, polygon)) {
                vertex.normal = orient(n);
            }
            if let Some(t) = source.tangents.as_ref().and_then(|l| l.get(corner, polygon)) {
                vertex.tangent = orient(t);
            }
            if let Some(b) = source.binormals.as_ref().and_then(|l| l.get(corner, polygon)) {
                vertex.binormal = orient(b);
            }
            if let Some(c) = source.colors.as_ref().and_then(|l| l.get(corner, polygon)) {
                vertex.color = c;
            }
        }
        if generate_tangents {
            if let Some((tangent, binormal)) = triangle_tangent_frame(&corners) {
                for vertex in &mut corners {
                    vertex.tangent = tangent;
                    if source.binormals.is_none() {
                        vertex.binormal = binormal;
                    }
                }
            }
        }
        sub_meshes[slot].vertices.extend_from_slice(&corners);
    }
    sub_meshes
}

/// Tangent and binormal of a triangle from its positions and UVs.
fn triangle_tangent_frame(corners: &[Vertex; 3]) -> Option<(Vec3, Vec3)> {
    let edge1 = corners[1].position - corners[0].position;
    let edge2 = corners[2].position - corners[0].position;
    let duv1 = corners[1].uv0 - corners[0].uv0;
    let duv2 = corners[2].uv0 - corners[0].uv0;
    let determinant = duv1.x * duv2.y - duv2.x * duv1.y;
    if determinant.abs() <= f32::EPSILON {
        return None;
    }
    let r = 1.0 / determinant;
    let tangent = ((edge1 * duv2.y - edge2 * duv1.y) * r).try_normalize()?;
    let binormal = ((edge2 * duv1.x - edge1 * duv2.x) * r).try_normalize()?;
    Some((tangent, binormal))
}

/// Writes imported meshes into the registry.
///
/// An existing mesh keeps its handle: its runtime resources are destroyed,
/// its fields replaced and its resources recreated. Missing materials are
/// created with defaults and mesh components showing a re-imported mesh
/// are reloaded.
pub fn apply_imported_meshes(
    registry: &mut ManagerRegistry,
    imported: Vec<ImportedMesh>,
) -> Vec<MeshRef> {
    let mut handles = Vec::with_capacity(imported.len());
    let mut reimported = Vec::new();

    for ImportedMesh { name, mesh } in imported {
        let material_names = mesh.material_names_per_sub_mesh.clone();
        let meshes = registry.resources_mut::<Mesh>();
        let handle = match meshes.find(name.as_str()) {
            Some(existing) => {
                meshes.destroy_resources(&[existing]);
                meshes[existing] = mesh;
                reimported.push(name.clone());
                existing
            }
            None => {
                let handle = meshes.create(name.clone());
                meshes[handle] = mesh;
                handle
            }
        };
        meshes.create_resources(&[handle]);
        if !handles.contains(&handle) {
            handles.push(handle);
        }

        let materials = registry.resources_mut::<Material>();
        for material_name in material_names {
            if materials.find(material_name.as_str()).is_none() {
                log::info!("Creating material `{material_name}` for mesh `{name}`");
                let material = materials.create(material_name);
                materials.create_resources(&[material]);
            }
        }
    }

    if !reimported.is_empty() {
        let components = registry.components_mut::<MeshComponent>();
        let affected: Vec<_> = components
            .iter()
            .filter(|(_, component)| reimported.contains(&component.mesh_name))
            .map(|(handle, _)| handle)
            .collect();
        if !affected.is_empty() {
            log::debug!("Reloading {} mesh component(s)", affected.len());
            components.destroy_resources(&affected);
            components.create_resources(&affected);
        }
    }
    handles
}

/// Imports every mesh of `scene`. Returns the handles of the written meshes;
/// empty when the scene contained nothing importable.
pub fn import_meshes(registry: &mut ManagerRegistry, scene: &ImportScene) -> Vec<MeshRef> {
    let imported = build_meshes(scene);
    if imported.is_empty() {
        log::error!("Scene contains no importable meshes");
        return Vec::new();
    }
    apply_imported_meshes(registry, imported)
}
