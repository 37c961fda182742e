use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use fxhash::FxHashMap;
use glam::{Vec2, Vec3};

use super::scene::{
    ImportScene, LayerElement, Mapping, MaterialMapping, NodeAttribute, SceneLoader, SceneNode,
    SourceMesh,
};

/// Loader for Wavefront OBJ files.
///
/// Every `o`/`g` statement starts a node; faces before the first one land
/// in a node named after the file. `usemtl` assigns the following faces to
/// a material of the current node.
#[derive(Debug, Default, Clone, Copy)]
pub struct ObjSceneLoader;

impl SceneLoader for ObjSceneLoader {
    fn extensions(&self) -> &[&'static str] {
        &["obj"]
    }

    fn load(&self, path: &Path) -> Result<ImportScene> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read OBJ file {}", path.display()))?;
        let default_name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("mesh");
        load_obj_from_str(&data, default_name)
            .with_context(|| format!("failed to parse OBJ file {}", path.display()))
    }
}

/// Parses OBJ text into a scene with one child node per object.
pub fn load_obj_from_str(data: &str, default_name: &str) -> Result<ImportScene> {
    let mut positions = Vec::new();
    let mut uvs = Vec::new();
    let mut normals = Vec::new();
    let mut objects = vec![ObjObject::new(default_name)];

    for (line_no, line) in data.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let mut parts = trimmed.split_whitespace();
        let Some(tag) = parts.next() else {
            continue;
        };
        match tag {
            "v" => positions.push(
                parse_vec3(parts)
                    .with_context(|| format!("invalid vertex on line {}", line_no + 1))?,
            ),
            "vt" => uvs.push(
                parse_vec2(parts)
                    .with_context(|| format!("invalid texture coordinate on line {}", line_no + 1))?,
            ),
            "vn" => normals.push(
                parse_vec3(parts)
                    .with_context(|| format!("invalid normal on line {}", line_no + 1))?,
            ),
            "o" | "g" => {
                let name = parts.collect::<Vec<_>>().join(" ");
                let current = objects.last_mut().ok_or_else(|| anyhow!("no current object"))?;
                if current.faces.is_empty() {
                    if !name.is_empty() {
                        current.name = name;
                    }
                } else {
                    let mut next =
                        ObjObject::new(if name.is_empty() { default_name } else { name.as_str() });
                    // The active material carries over into the new object.
                    if let Some(material) = current.materials.get(current.current_material as usize) {
                        next.use_material(material.clone());
                    }
                    objects.push(next);
                }
            }
            "usemtl" => {
                let material = parts.collect::<Vec<_>>().join(" ");
                if let Some(current) = objects.last_mut() {
                    current.use_material(material);
                }
            }
            "f" => {
                let face = parse_face(parts, positions.len(), uvs.len(), normals.len())
                    .with_context(|| format!("invalid face on line {}", line_no + 1))?;
                if let Some(current) = objects.last_mut() {
                    current.faces.push(ObjFace {
                        material: current.current_material,
                        ..face
                    });
                }
            }
            _ => {}
        }
    }

    if positions.is_empty() {
        return Err(anyhow!("OBJ file does not define any vertices"));
    }

    let mut scene = ImportScene::new();
    let root = scene.add_node(None, SceneNode::new("RootNode"));
    for object in objects.into_iter().filter(|object| !object.faces.is_empty()) {
        let node = object.into_node(&positions, &uvs, &normals);
        scene.add_node(Some(root), node);
    }
    Ok(scene)
}

#[derive(Debug, Clone, Copy)]
struct FaceIndex {
    v: Option<usize>,
    vt: Option<usize>,
    vn: Option<usize>,
}

#[derive(Debug, Clone)]
struct ObjFace {
    corners: Vec<FaceIndex>,
    material: u32,
}

#[derive(Debug)]
struct ObjObject {
    name: String,
    materials: Vec<String>,
    current_material: u32,
    faces: Vec<ObjFace>,
}

impl ObjObject {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            materials: Vec::new(),
            current_material: 0,
            faces: Vec::new(),
        }
    }

    fn use_material(&mut self, material: String) {
        self.current_material = match self.materials.iter().position(|m| *m == material) {
            Some(index) => index as u32,
            None => {
                self.materials.push(material);
                (self.materials.len() - 1) as u32
            }
        };
    }

    fn into_node(self, positions: &[Vec3], uvs: &[Vec2], normals: &[Vec3]) -> SceneNode {
        // OBJ indices are file-global; each node gets its own control points.
        let mut lookup: FxHashMap<usize, u32> = FxHashMap::default();
        let mut control_points = Vec::new();
        let mut polygons = Vec::with_capacity(self.faces.len());
        let mut uv_indices = Vec::new();
        let mut normal_indices = Vec::new();
        let has_uvs = self.faces.iter().flat_map(|f| &f.corners).any(|c| c.vt.is_some());
        let has_normals = self.faces.iter().flat_map(|f| &f.corners).any(|c| c.vn.is_some());

        for face in &self.faces {
            let mut polygon = Vec::with_capacity(face.corners.len());
            for corner in &face.corners {
                let point = match corner.v {
                    Some(global) => *lookup.entry(global).or_insert_with(|| {
                        control_points.push(positions[global]);
                        (control_points.len() - 1) as u32
                    }),
                    // Out of range, dropped later as a bad polygon.
                    None => u32::MAX,
                };
                polygon.push(point);
                uv_indices.push(corner.vt.map_or(u32::MAX, |i| i as u32));
                normal_indices.push(corner.vn.map_or(u32::MAX, |i| i as u32));
            }
            polygons.push(polygon);
        }

        let material_mapping = if self.materials.len() > 1 {
            MaterialMapping::ByPolygon(self.faces.iter().map(|face| face.material).collect())
        } else {
            MaterialMapping::AllSame
        };

        let mesh = SourceMesh {
            control_points,
            polygons,
            material_mapping,
            uv0: has_uvs.then(|| LayerElement {
                mapping: Mapping::ByPolygonVertex,
                values: uvs.to_vec(),
                indices: Some(uv_indices),
            }),
            normals: has_normals.then(|| LayerElement {
                mapping: Mapping::ByPolygonVertex,
                values: normals.to_vec(),
                indices: Some(normal_indices),
            }),
            ..SourceMesh::default()
        };

        let mut node = SceneNode::new(self.name);
        node.materials = self.materials;
        node.attributes.push(NodeAttribute::Mesh(mesh));
        node
    }
}

fn parse_vec3<'a>(mut parts: impl Iterator<Item = &'a str>) -> Result<Vec3> {
    let mut next = || -> Result<f32> {
        Ok(parts
            .next()
            .ok_or_else(|| anyhow!("missing vector component"))?
            .parse::<f32>()?)
    };
    Ok(Vec3::new(next()?, next()?, next()?))
}

fn parse_vec2<'a>(mut parts: impl Iterator<Item = &'a str>) -> Result<Vec2> {
    let mut next = || -> Result<f32> {
        Ok(parts
            .next()
            .ok_or_else(|| anyhow!("missing texture coordinate component"))?
            .parse::<f32>()?)
    };
    Ok(Vec2::new(next()?, next()?))
}

fn parse_face<'a>(
    parts: impl Iterator<Item = &'a str>,
    position_count: usize,
    uv_count: usize,
    normal_count: usize,
) -> Result<ObjFace> {
    let mut corners = Vec::new();
    for part in parts {
        let mut segments = part.split('/');
        let vi = segments
            .next()
            .ok_or_else(|| anyhow!("missing vertex index"))?
            .parse::<i64>()?;
        let vt = parse_optional_index(segments.next())?;
        let vn = parse_optional_index(segments.next())?;
        corners.push(FaceIndex {
            v: fix_index(vi, position_count),
            vt: vt.and_then(|index| fix_index(index, uv_count)),
            vn: vn.and_then(|index| fix_index(index, normal_count)),
        });
    }
    Ok(ObjFace {
        corners,
        material: 0,
    })
}

fn parse_optional_index(segment: Option<&str>) -> Result<Option<i64>> {
    match segment {
        Some(text) if !text.is_empty() => Ok(Some(text.parse::<i64>()?)),
        _ => Ok(None),
    }
}

/// Resolves a one-based (or negative, end-relative) OBJ index against the
/// number of elements declared so far.
fn fix_index(index: i64, len: usize) -> Option<usize> {
    if index > 0 {
        let zero_based = index as usize - 1;
        (zero_based < len).then_some(zero_based)
    } else if index < 0 {
        let abs = index.unsigned_abs() as usize;
        (abs <= len).then_some(len - abs)
    } else {
        None
    }
}
