//! Neutral scene graph the mesh importer works on, plus the XML
//! interchange loader and the external converter used for FBX files.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, bail, Context, Result};
use glam::{EulerRot, Mat4, Quat, Vec2, Vec3, Vec4};
use roxmltree::{Document, Node};

/// How a layer element's values are addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mapping {
    #[default]
    ByControlPoint,
    ByPolygonVertex,
    ByPolygon,
    AllSame,
}

impl Mapping {
    fn parse(text: &str) -> Result<Self> {
        match text {
            "byControlPoint" => Ok(Mapping::ByControlPoint),
            "byPolygonVertex" => Ok(Mapping::ByPolygonVertex),
            "byPolygon" => Ok(Mapping::ByPolygon),
            "allSame" => Ok(Mapping::AllSame),
            other => Err(anyhow!("unknown layer mapping `{other}`")),
        }
    }
}

/// One vertex channel of a source mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerElement<T> {
    pub mapping: Mapping,
    pub values: Vec<T>,
    /// Index-to-direct indirection. `None` addresses `values` directly.
    pub indices: Option<Vec<u32>>,
}

impl<T: Copy> LayerElement<T> {
    pub fn direct(mapping: Mapping, values: Vec<T>) -> Self {
        Self {
            mapping,
            values,
            indices: None,
        }
    }

    /// Value for one polygon corner, or `None` if the element does not
    /// cover it.
    pub fn get(&self, corner: Corner, polygon: u32) -> Option<T> {
        let slot = match self.mapping {
            Mapping::ByControlPoint => corner.control_point,
            Mapping::ByPolygonVertex => corner.polygon_vertex,
            Mapping::ByPolygon => polygon,
            Mapping::AllSame => 0,
        };
        let slot = match &self.indices {
            Some(indices) => *indices.get(slot as usize)?,
            None => slot,
        };
        self.values.get(slot as usize).copied()
    }
}

/// Assignment of polygons to the owning node's materials.
#[derive(Debug, Clone, PartialEq)]
pub enum MaterialMapping {
    AllSame,
    /// Material index per polygon.
    ByPolygon(Vec<u32>),
    /// Any other mode found in the source file.
    Unsupported(String),
}

/// A corner of a polygon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Corner {
    pub control_point: u32,
    /// Running corner index over all polygons of the mesh.
    pub polygon_vertex: u32,
}

/// Triangle produced from a source polygon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triangle {
    pub polygon: u32,
    pub corners: [Corner; 3],
}

/// Polygon mesh as stored in a source file.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMesh {
    pub control_points: Vec<Vec3>,
    pub polygons: Vec<Vec<u32>>,
    pub material_mapping: MaterialMapping,
    pub uv0: Option<LayerElement<Vec2>>,
    pub normals: Option<LayerElement<Vec3>>,
    pub tangents: Option<LayerElement<Vec3>>,
    pub binormals: Option<LayerElement<Vec3>>,
    pub colors: Option<LayerElement<Vec4>>,
}

impl Default for SourceMesh {
    fn default() -> Self {
        Self {
            control_points: Vec::new(),
            polygons: Vec::new(),
            material_mapping: MaterialMapping::AllSame,
            uv0: None,
            normals: None,
            tangents: None,
            binormals: None,
            colors: None,
        }
    }
}

impl SourceMesh {
    pub fn is_triangle_mesh(&self) -> bool {
        !self.polygons.is_empty() && self.polygons.iter().all(|polygon| polygon.len() == 3)
    }

    /// A polygon is bad when it has fewer than three corners, references a
    /// missing control point or uses a control point twice.
    pub fn is_bad_polygon(&self, polygon: &[u32]) -> bool {
        if polygon.len() < 3 {
            return true;
        }
        let count = self.control_points.len() as u32;
        polygon.iter().enumerate().any(|(i, &point)| {
            point >= count || polygon[..i].contains(&point)
        })
    }

    /// Fan-triangulates every good polygon. Returns the triangles and the
    /// number of bad polygons that were dropped.
    ///
    /// Corner indices keep counting across dropped polygons so
    /// per-polygon-vertex layer elements stay addressable.
    pub fn triangles(&self) -> (Vec<Triangle>, usize) {
        let mut triangles = Vec::new();
        let mut bad = 0;
        let mut polygon_vertex = 0u32;
        for (polygon_index, polygon) in self.polygons.iter().enumerate() {
            let first = polygon_vertex;
            polygon_vertex += polygon.len() as u32;
            if self.is_bad_polygon(polygon) {
                bad += 1;
                continue;
            }
            let corner = |i: usize| Corner {
                control_point: polygon[i],
                polygon_vertex: first + i as u32,
            };
            for i in 1..(polygon.len() - 1) {
                triangles.push(Triangle {
                    polygon: polygon_index as u32,
                    corners: [corner(0), corner(i), corner(i + 1)],
                });
            }
        }
        (triangles, bad)
    }

    /// Material slot of a polygon, `None` for unsupported mappings.
    pub fn material_index(&self, polygon: u32) -> Option<u32> {
        match &self.material_mapping {
            MaterialMapping::AllSame => Some(0),
            MaterialMapping::ByPolygon(indices) => {
                Some(indices.get(polygon as usize).copied().unwrap_or(0))
            }
            MaterialMapping::Unsupported(_) => None,
        }
    }
}

/// Data attached to a node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeAttribute {
    Mesh(SourceMesh),
    /// Cameras, lights, skeletons and anything else the importer skips.
    Other(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneNode {
    pub name: String,
    pub local_transform: Mat4,
    pub materials: Vec<String>,
    pub attributes: Vec<NodeAttribute>,
    pub children: Vec<usize>,
}

impl SceneNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            local_transform: Mat4::IDENTITY,
            materials: Vec::new(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }
}

/// Node arena. Node 0 is the root once one was added.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportScene {
    pub nodes: Vec<SceneNode>,
}

impl ImportScene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `node` below `parent`, returning its index.
    pub fn add_node(&mut self, parent: Option<usize>, node: SceneNode) -> usize {
        let index = self.nodes.len();
        self.nodes.push(node);
        if let Some(parent) = parent {
            self.nodes[parent].children.push(index);
        }
        index
    }

    pub fn root(&self) -> Option<usize> {
        (!self.nodes.is_empty()).then_some(0)
    }

    /// Depth-first walk from the root yielding each node with its global
    /// transform. Parents are visited before their children.
    pub fn walk(&self) -> Vec<(usize, Mat4)> {
        let mut visited = Vec::with_capacity(self.nodes.len());
        let Some(root) = self.root() else {
            return visited;
        };
        let mut stack = vec![(root, Mat4::IDENTITY)];
        while let Some((index, parent_transform)) = stack.pop() {
            let node = &self.nodes[index];
            let global = parent_transform * node.local_transform;
            visited.push((index, global));
            for &child in node.children.iter().rev() {
                stack.push((child, global));
            }
        }
        visited
    }
}

/// Reads a source file into an [`ImportScene`].
pub trait SceneLoader: Send + Sync {
    /// Lower-case extensions this loader handles, without the dot.
    fn extensions(&self) -> &[&'static str];

    fn load(&self, path: &Path) -> Result<ImportScene>;
}

/// Loader for the XML interchange format.
///
/// ```xml
/// <scene>
///   <node name="crate">
///     <translation>0 1 0</translation>
///     <material>crate_mat</material>
///     <mesh>
///       <points>-1 0 -1  1 0 -1  1 0 1  -1 0 1</points>
///       <polygon>0 1 2 3</polygon>
///       <uv mapping="byControlPoint">0 0  1 0  1 1  0 1</uv>
///     </mesh>
///   </node>
/// </scene>
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct XmlSceneLoader;

impl XmlSceneLoader {
    pub fn parse(xml: &str) -> Result<ImportScene> {
        let document = Document::parse(xml).context("invalid scene XML")?;
        let root = document.root_element();
        if !root.has_tag_name("scene") {
            bail!("scene root node is missing");
        }

        let mut scene = ImportScene::new();
        let root_index = scene.add_node(None, SceneNode::new("RootNode"));
        let mut pending: Vec<(Node<'_, '_>, usize)> = root
            .children()
            .filter(|child| child.has_tag_name("node"))
            .map(|child| (child, root_index))
            .collect();
        pending.reverse();

        while let Some((element, parent)) = pending.pop() {
            let node = parse_node(&element)?;
            let index = scene.add_node(Some(parent), node);
            let mut children: Vec<_> = element
                .children()
                .filter(|child| child.has_tag_name("node"))
                .map(|child| (child, index))
                .collect();
            children.reverse();
            pending.extend(children);
        }
        Ok(scene)
    }
}

impl SceneLoader for XmlSceneLoader {
    fn extensions(&self) -> &[&'static str] {
        &["xml"]
    }

    fn load(&self, path: &Path) -> Result<ImportScene> {
        let xml = fs::read_to_string(path)
            .with_context(|| format!("failed to read scene {}", path.display()))?;
        Self::parse(&xml).with_context(|| format!("failed to parse scene {}", path.display()))
    }
}

/// Runs an external converter that turns a binary scene (FBX) into the
/// XML interchange form, then loads that.
///
/// The converter is invoked as `<executable> <source> <destination.xml>`.
#[derive(Debug, Clone)]
pub struct ConverterSceneLoader {
    executable: PathBuf,
}

impl ConverterSceneLoader {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }
}

impl SceneLoader for ConverterSceneLoader {
    fn extensions(&self) -> &[&'static str] {
        &["fbx"]
    }

    fn load(&self, path: &Path) -> Result<ImportScene> {
        let stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("scene");
        let converted =
            std::env::temp_dir().join(format!("{stem}-{}.scene.xml", std::process::id()));
        let status = Command::new(&self.executable)
            .arg(path)
            .arg(&converted)
            .status()
            .with_context(|| {
                format!(
                    "failed to launch scene converter {}",
                    self.executable.display()
                )
            })?;
        if !status.success() {
            let _ = fs::remove_file(&converted);
            bail!(
                "scene converter failed on {} ({status})",
                path.display()
            );
        }
        let scene = XmlSceneLoader.load(&converted);
        let _ = fs::remove_file(&converted);
        scene
    }
}

fn parse_node(element: &Node<'_, '_>) -> Result<SceneNode> {
    let name = element
        .attribute("name")
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| anyhow!("<node> is missing its name attribute"))?;
    let mut node = SceneNode::new(name);

    node.local_transform = match optional_text(element, "transform") {
        Some(text) => {
            let values = parse_floats(&text)?;
            let columns: [f32; 16] = values
                .try_into()
                .map_err(|_| anyhow!("<transform> of node `{name}` needs 16 values"))?;
            Mat4::from_cols_array(&columns)
        }
        None => {
            let translation = parse_vec3(optional_text(element, "translation"), Vec3::ZERO)?;
            let rotation = parse_vec3(optional_text(element, "rotation"), Vec3::ZERO)?;
            let scale = parse_vec3(optional_text(element, "scale"), Vec3::ONE)?;
            let rotation = Quat::from_euler(
                EulerRot::XYZ,
                rotation.x.to_radians(),
                rotation.y.to_radians(),
                rotation.z.to_radians(),
            );
            Mat4::from_scale_rotation_translation(scale, rotation, translation)
        }
    };

    node.materials = element
        .children()
        .filter(|child| child.has_tag_name("material"))
        .filter_map(|child| child.text())
        .map(|text| text.trim().to_string())
        .collect();

    for child in element.children().filter(Node::is_element) {
        match child.tag_name().name() {
            "mesh" => node.attributes.push(NodeAttribute::Mesh(
                parse_mesh(&child).with_context(|| format!("invalid mesh in node `{name}`"))?,
            )),
            "attribute" => node.attributes.push(NodeAttribute::Other(
                child.attribute("type").unwrap_or("unknown").to_string(),
            )),
            _ => {}
        }
    }
    Ok(node)
}

fn parse_mesh(element: &Node<'_, '_>) -> Result<SourceMesh> {
    let points = parse_floats(&required_text(element, "points")?)?;
    if points.len() % 3 != 0 {
        bail!("<points> must hold xyz triples");
    }
    let mut mesh = SourceMesh {
        control_points: points
            .chunks_exact(3)
            .map(|xyz| Vec3::new(xyz[0], xyz[1], xyz[2]))
            .collect(),
        ..SourceMesh::default()
    };

    for polygon in element.children().filter(|child| child.has_tag_name("polygon")) {
        mesh.polygons
            .push(parse_indices(polygon.text().unwrap_or_default())?);
    }

    if let Some(materials) = element.children().find(|child| child.has_tag_name("materials")) {
        mesh.material_mapping = match materials.attribute("mapping").unwrap_or("allSame") {
            "allSame" => MaterialMapping::AllSame,
            "byPolygon" => {
                MaterialMapping::ByPolygon(parse_indices(materials.text().unwrap_or_default())?)
            }
            other => MaterialMapping::Unsupported(other.to_string()),
        };
    }

    mesh.uv0 = parse_layer(element, "uv", |v: [f32; 2]| Vec2::from_array(v))?;
    mesh.normals = parse_layer(element, "normals", |v: [f32; 3]| Vec3::from_array(v))?;
    mesh.tangents = parse_layer(element, "tangents", |v: [f32; 3]| Vec3::from_array(v))?;
    mesh.binormals = parse_layer(element, "binormals", |v: [f32; 3]| Vec3::from_array(v))?;
    mesh.colors = parse_layer(element, "colors", |v: [f32; 4]| Vec4::from_array(v))?;
    Ok(mesh)
}

fn parse_layer<T, const N: usize>(
    element: &Node<'_, '_>,
    tag: &str,
    build: impl Fn([f32; N]) -> T,
) -> Result<Option<LayerElement<T>>> {
    let Some(layer) = element.children().find(|child| child.has_tag_name(tag)) else {
        return Ok(None);
    };
    let mapping = Mapping::parse(layer.attribute("mapping").unwrap_or("byControlPoint"))?;
    let values = parse_floats(layer.text().unwrap_or_default())?;
    if values.len() % N != 0 {
        bail!("<{tag}> must hold groups of {N} values");
    }
    let values = values
        .chunks_exact(N)
        .map(|chunk| {
            let mut array = [0.0; N];
            array.copy_from_slice(chunk);
            build(array)
        })
        .collect();
    let indices = layer.attribute("indices").map(parse_indices).transpose()?;
    Ok(Some(LayerElement {
        mapping,
        values,
        indices,
    }))
}

fn required_text(node: &Node<'_, '_>, tag: &str) -> Result<String> {
    optional_text(node, tag).ok_or_else(|| anyhow!("<{tag}> tag is missing"))
}

fn optional_text(node: &Node<'_, '_>, tag: &str) -> Option<String> {
    node.children()
        .find(|child| child.has_tag_name(tag))
        .and_then(|child| child.text())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(|text| text.to_string())
}

fn parse_floats(text: &str) -> Result<Vec<f32>> {
    text.split_whitespace()
        .map(|value| {
            value
                .parse::<f32>()
                .map_err(|err| anyhow!("failed to parse float `{value}`: {err}"))
        })
        .collect()
}

fn parse_indices(text: &str) -> Result<Vec<u32>> {
    text.split_whitespace()
        .map(|value| {
            value
                .parse::<u32>()
                .map_err(|err| anyhow!("failed to parse index `{value}`: {err}"))
        })
        .collect()
}

fn parse_vec3(value: Option<String>, default: Vec3) -> Result<Vec3> {
    let Some(value) = value else {
        return Ok(default);
    };
    match parse_floats(&value)?.as_slice() {
        &[x, y, z] => Ok(Vec3::new(x, y, z)),
        _ => Err(anyhow!("vector needs exactly 3 components")),
    }
}
