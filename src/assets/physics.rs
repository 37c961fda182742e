//! Offline cooking of collision meshes.
//!
//! Every mesh is cooked twice: a triangle mesh (`.pm`) and a convex hull
//! (`.pcm`). When the convex cook fails the hull of the inflated bounding
//! box is cooked instead.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use thiserror::Error;

use super::hull::{convex_hull, limit_vertices};
use crate::dod::ResourceManager;
use crate::math::Aabb;
use crate::name::Name;
use crate::resources::{Mesh, MeshRef};

/// Growth applied to the bounding box used by the convex fallback.
pub const FALLBACK_AABB_INFLATION: f32 = 0.01;

/// Largest vertex count of a cooked convex hull. Larger hulls are reduced.
pub const MAX_CONVEX_POINTS: usize = 255;

pub const TRIANGLE_MESH_MAGIC: [u8; 4] = *b"PMSH";
pub const CONVEX_MESH_MAGIC: [u8; 4] = *b"PCVX";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CookError {
    #[error("mesh has no geometry")]
    Empty,
    #[error("geometry contains non-finite coordinates")]
    NonFinite,
    #[error("index {index} is out of range for {vertices} vertices")]
    IndexOutOfRange { index: u32, vertices: usize },
    #[error("convex hulls need at least 4 points, got {0}")]
    TooFewPoints(usize),
    #[error("points are coplanar or otherwise degenerate")]
    Degenerate,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convex cooking flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvexFlags {
    /// Push every point outward by the skin width.
    pub inflate_convex: bool,
}

impl ConvexFlags {
    pub const DEFAULT: ConvexFlags = ConvexFlags {
        inflate_convex: true,
    };
    pub const FALLBACK: ConvexFlags = ConvexFlags {
        inflate_convex: false,
    };
}

/// Physics cooking backend.
pub trait PhysicsCooking: Send + Sync {
    fn cook_triangle_mesh(
        &self,
        positions: &[Vec3],
        indices: &[u32],
        out: &mut dyn Write,
    ) -> Result<(), CookError>;

    fn cook_convex_mesh(
        &self,
        points: &[Vec3],
        flags: ConvexFlags,
        out: &mut dyn Write,
    ) -> Result<(), CookError>;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct CookedHeader {
    magic: [u8; 4],
    version: u32,
    point_count: u32,
    index_count: u32,
}

/// Built-in cooker writing a flat binary payload: a header followed by the
/// points and, for triangle meshes, the indices, in native byte order.
///
/// Convex cooks keep only the hull vertices of the input, reduced to
/// [`MAX_CONVEX_POINTS`] when the hull is larger.
#[derive(Debug, Clone, Copy)]
pub struct BinaryCooking {
    pub skin_width: f32,
}

impl Default for BinaryCooking {
    fn default() -> Self {
        Self { skin_width: 0.01 }
    }
}

fn write_payload(
    out: &mut dyn Write,
    magic: [u8; 4],
    points: &[Vec3],
    indices: &[u32],
) -> Result<(), CookError> {
    let header = CookedHeader {
        magic,
        version: FORMAT_VERSION,
        point_count: points.len() as u32,
        index_count: indices.len() as u32,
    };
    out.write_all(bytemuck::bytes_of(&header))?;
    out.write_all(bytemuck::cast_slice(points))?;
    out.write_all(bytemuck::cast_slice(indices))?;
    out.flush()?;
    Ok(())
}

/// Removes exact duplicates, keeping first occurrences.
fn unique_points(points: &[Vec3]) -> Vec<Vec3> {
    let mut seen = fxhash::FxHashSet::default();
    points
        .iter()
        .copied()
        .filter(|point| seen.insert(point.to_array().map(f32::to_bits)))
        .collect()
}

impl PhysicsCooking for BinaryCooking {
    fn cook_triangle_mesh(
        &self,
        positions: &[Vec3],
        indices: &[u32],
        out: &mut dyn Write,
    ) -> Result<(), CookError> {
        if positions.is_empty() || indices.len() < 3 {
            return Err(CookError::Empty);
        }
        if !positions.iter().all(|p| p.is_finite()) {
            return Err(CookError::NonFinite);
        }
        if let Some(&index) = indices.iter().find(|&&i| i as usize >= positions.len()) {
            return Err(CookError::IndexOutOfRange {
                index,
                vertices: positions.len(),
            });
        }
        let whole = indices.len() - indices.len() % 3;
        write_payload(out, TRIANGLE_MESH_MAGIC, positions, &indices[..whole])
    }

    fn cook_convex_mesh(
        &self,
        points: &[Vec3],
        flags: ConvexFlags,
        out: &mut dyn Write,
    ) -> Result<(), CookError> {
        if !points.iter().all(|p| p.is_finite()) {
            return Err(CookError::NonFinite);
        }
        let unique = unique_points(points);
        if unique.len() < 4 {
            return Err(CookError::TooFewPoints(unique.len()));
        }
        let hull = convex_hull(&unique).ok_or(CookError::Degenerate)?;
        let vertices: Vec<Vec3> = hull.iter().map(|&index| unique[index]).collect();
        let mut points = limit_vertices(&vertices, MAX_CONVEX_POINTS);
        if flags.inflate_convex {
            let center = Aabb::from_points(&points).center();
            for point in &mut points {
                let direction = (*point - center).normalize_or_zero();
                *point += direction * self.skin_width;
            }
        }
        write_payload(out, CONVEX_MESH_MAGIC, &points, &[])
    }
}

/// Outcome of a cooking pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CookReport {
    /// Meshes whose convex hull cooked directly.
    pub cooked: Vec<Name>,
    /// Meshes whose convex hull came from the bounding box fallback.
    pub fallback: Vec<Name>,
    /// Meshes with no usable convex output.
    pub skipped: Vec<Name>,
}

fn cook_to_file(
    path: &Path,
    cook: impl FnOnce(&mut dyn Write) -> Result<(), CookError>,
) -> Result<(), CookError> {
    let mut writer = BufWriter::new(File::create(path)?);
    cook(&mut writer)?;
    writer.flush()?;
    Ok(())
}

fn remove_partial(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            log::warn!("Failed to remove {}: {err}", path.display());
        }
    }
}

/// Cooks `<name>.pm` and `<name>.pcm` under `out_dir` for every listed mesh.
///
/// Per-mesh failures are logged and recorded in the report; only a failure
/// to create `out_dir` is returned as an error.
pub fn cook_physics_meshes(
    meshes: &ResourceManager<Mesh>,
    handles: &[MeshRef],
    cooker: &dyn PhysicsCooking,
    out_dir: &Path,
) -> Result<CookReport> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    let mut report = CookReport::default();

    for &handle in handles {
        let Some(mesh) = meshes.get(handle) else {
            continue;
        };
        let name = meshes.name(handle).clone();
        let (positions, indices) = mesh.merged_geometry();
        if positions.is_empty() || indices.is_empty() {
            log::debug!("Mesh `{name}` has no geometry to cook");
            report.skipped.push(name);
            continue;
        }

        let stem = name.file_stem();
        let triangle_path = out_dir.join(format!("{stem}.pm"));
        if let Err(err) = cook_to_file(&triangle_path, |out| {
            cooker.cook_triangle_mesh(&positions, &indices, out)
        }) {
            log::warn!("Failed to cook triangle mesh for `{name}`: {err}");
            remove_partial(&triangle_path);
        }

        let convex_path = out_dir.join(format!("{stem}.pcm"));
        match cook_to_file(&convex_path, |out| {
            cooker.cook_convex_mesh(&positions, ConvexFlags::DEFAULT, out)
        }) {
            Ok(()) => report.cooked.push(name),
            Err(err) => {
                log::warn!("Convex cooking failed for `{name}` ({err}), using its bounding box");
                let corners = mesh
                    .bounds()
                    .inflated(FALLBACK_AABB_INFLATION)
                    .corners();
                match cook_to_file(&convex_path, |out| {
                    cooker.cook_convex_mesh(&corners, ConvexFlags::FALLBACK, out)
                }) {
                    Ok(()) => report.fallback.push(name),
                    Err(err) => {
                        log::warn!("Bounding box cooking failed for `{name}`: {err}");
                        remove_partial(&convex_path);
                        report.skipped.push(name);
                    }
                }
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec2, Vec4};
    use tempfile::tempdir;

    fn mesh(positions: Vec<Vec3>, indices: Vec<u32>) -> Mesh {
        let count = positions.len();
        Mesh {
            positions_per_sub_mesh: vec![positions],
            uv0s_per_sub_mesh: vec![vec![Vec2::ZERO; count]],
            normals_per_sub_mesh: vec![vec![Vec3::Y; count]],
            tangents_per_sub_mesh: vec![vec![Vec3::Z; count]],
            binormals_per_sub_mesh: vec![vec![Vec3::X; count]],
            vertex_colors_per_sub_mesh: vec![vec![Vec4::ONE; count]],
            indices_per_sub_mesh: vec![indices],
            material_names_per_sub_mesh: vec![Name::new("default")],
            aabb_per_sub_mesh: Vec::new(),
        }
    }

    fn cube() -> Mesh {
        let corners = Aabb {
            min: Vec3::splat(-1.0),
            max: Vec3::ONE,
        }
        .corners()
        .to_vec();
        mesh(corners, vec![0, 1, 2, 2, 3, 0, 4, 5, 6, 6, 7, 4])
    }

    fn flat_quad() -> Mesh {
        mesh(
            vec![
                Vec3::new(-1.0, 0.0, -1.0),
                Vec3::new(1.0, 0.0, -1.0),
                Vec3::new(1.0, 0.0, 1.0),
                Vec3::new(-1.0, 0.0, 1.0),
            ],
            vec![0, 1, 2, 0, 2, 3],
        )
    }

    fn slab() -> Vec<Vec3> {
        let mut points = Vec::new();
        for z in [0.0, 1.0] {
            for y in 0..20 {
                for x in 0..20 {
                    points.push(Vec3::new(x as f32, y as f32, z));
                }
            }
        }
        points
    }

    fn decode(bytes: &[u8]) -> (CookedHeader, Vec<Vec3>) {
        let size = std::mem::size_of::<CookedHeader>();
        let header: CookedHeader = bytemuck::pod_read_unaligned(&bytes[..size]);
        let points = bytes[size..]
            .chunks_exact(std::mem::size_of::<Vec3>())
            .take(header.point_count as usize)
            .map(bytemuck::pod_read_unaligned::<Vec3>)
            .collect();
        (header, points)
    }

    fn cook_convex(points: &[Vec3], flags: ConvexFlags) -> (CookedHeader, Vec<Vec3>) {
        let mut bytes = Vec::new();
        BinaryCooking::default()
            .cook_convex_mesh(points, flags, &mut bytes)
            .unwrap();
        decode(&bytes)
    }

    /// Writes some bytes, then fails every convex cook.
    struct BrokenConvex;

    impl PhysicsCooking for BrokenConvex {
        fn cook_triangle_mesh(
            &self,
            positions: &[Vec3],
            indices: &[u32],
            out: &mut dyn Write,
        ) -> Result<(), CookError> {
            BinaryCooking::default().cook_triangle_mesh(positions, indices, out)
        }

        fn cook_convex_mesh(
            &self,
            _points: &[Vec3],
            _flags: ConvexFlags,
            out: &mut dyn Write,
        ) -> Result<(), CookError> {
            out.write_all(b"partial")?;
            Err(CookError::Degenerate)
        }
    }

    #[test]
    fn convex_cook_rejects_coplanar_points() {
        let mut sink = Vec::new();
        let result = BinaryCooking::default().cook_convex_mesh(
            &flat_quad().positions_per_sub_mesh[0],
            ConvexFlags::DEFAULT,
            &mut sink,
        );
        assert!(matches!(result, Err(CookError::Degenerate)));
    }

    #[test]
    fn convex_cook_rejects_too_few_points() {
        let mut sink = Vec::new();
        let result = BinaryCooking::default().cook_convex_mesh(
            &[Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::X],
            ConvexFlags::DEFAULT,
            &mut sink,
        );
        assert!(matches!(result, Err(CookError::TooFewPoints(3))));
    }

    #[test]
    fn inflation_pushes_points_outward() {
        let cooker = BinaryCooking { skin_width: 0.5 };
        let points = cube().positions_per_sub_mesh[0].clone();
        let mut plain = Vec::new();
        let mut inflated = Vec::new();
        cooker
            .cook_convex_mesh(&points, ConvexFlags::FALLBACK, &mut plain)
            .unwrap();
        cooker
            .cook_convex_mesh(&points, ConvexFlags::DEFAULT, &mut inflated)
            .unwrap();
        let (_, plain) = decode(&plain);
        let (_, inflated) = decode(&inflated);
        assert_eq!(plain.len(), 8);
        for (a, b) in plain.iter().zip(&inflated) {
            assert!((b.length() - a.length() - 0.5).abs() < 1e-5);
        }
    }

    #[test]
    fn interior_points_are_left_out_of_the_hull() {
        let mut points = cube().positions_per_sub_mesh[0].clone();
        points.push(Vec3::ZERO);
        points.push(Vec3::new(0.25, -0.5, 0.75));
        let (header, hull) = cook_convex(&points, ConvexFlags::FALLBACK);
        assert_eq!(header.point_count, 8);
        assert!(hull.iter().all(|point| point.abs() == Vec3::ONE));
    }

    #[test]
    fn hulls_over_the_vertex_limit_are_reduced() {
        let points = crate::assets::hull::tests::sphere(600);
        let (header, hull) = cook_convex(&points, ConvexFlags::FALLBACK);
        assert_eq!(header.point_count as usize, MAX_CONVEX_POINTS);
        assert!(hull.iter().all(|point| points.contains(point)));
    }

    #[test]
    fn dense_convex_meshes_cook_without_fallback() {
        let dir = tempdir().unwrap();
        let mut meshes = ResourceManager::<Mesh>::new();
        let handle = meshes.create("slab");
        meshes[handle] = mesh(slab(), vec![0, 1, 20, 1, 21, 20]);

        let report =
            cook_physics_meshes(&meshes, &[handle], &BinaryCooking::default(), dir.path()).unwrap();
        assert_eq!(report.cooked, vec![Name::new("slab")]);
        assert!(report.fallback.is_empty());
        let (header, _) = decode(&fs::read(dir.path().join("slab.pcm")).unwrap());
        assert_eq!(header.point_count, 8);
    }

    #[test]
    fn mesh_names_with_separators_stay_in_the_output_dir() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("physics");
        let mut meshes = ResourceManager::<Mesh>::new();
        let handle = meshes.create("props/crate");
        meshes[handle] = cube();

        let report = cook_physics_meshes(&meshes, &[handle], &BinaryCooking::default(), &out).unwrap();
        assert_eq!(report.cooked, vec![Name::new("props/crate")]);
        assert!(out.join("props_crate.pm").is_file());
        assert!(out.join("props_crate.pcm").is_file());
    }

    #[test]
    fn cube_cooks_both_files() {
        let dir = tempdir().unwrap();
        let mut meshes = ResourceManager::<Mesh>::new();
        let handle = meshes.create("box");
        meshes[handle] = cube();

        let report =
            cook_physics_meshes(&meshes, &[handle], &BinaryCooking::default(), dir.path()).unwrap();
        assert_eq!(report.cooked, vec![Name::new("box")]);
        let triangle = fs::read(dir.path().join("box.pm")).unwrap();
        assert_eq!(&triangle[..4], b"PMSH");
        let convex = fs::read(dir.path().join("box.pcm")).unwrap();
        assert_eq!(&convex[..4], b"PCVX");
    }

    #[test]
    fn flat_mesh_falls_back_to_its_bounding_box() {
        let dir = tempdir().unwrap();
        let mut meshes = ResourceManager::<Mesh>::new();
        let handle = meshes.create("floor");
        meshes[handle] = flat_quad();

        let report =
            cook_physics_meshes(&meshes, &[handle], &BinaryCooking::default(), dir.path()).unwrap();
        assert_eq!(report.fallback, vec![Name::new("floor")]);
        let (header, _) = decode(&fs::read(dir.path().join("floor.pcm")).unwrap());
        assert_eq!(header.point_count, 8);
    }

    #[test]
    fn failed_fallback_leaves_no_file() {
        let dir = tempdir().unwrap();
        let mut meshes = ResourceManager::<Mesh>::new();
        let handle = meshes.create("rock");
        meshes[handle] = cube();

        let report = cook_physics_meshes(&meshes, &[handle], &BrokenConvex, dir.path()).unwrap();
        assert_eq!(report.skipped, vec![Name::new("rock")]);
        assert!(!dir.path().join("rock.pcm").exists());
        assert!(dir.path().join("rock.pm").exists());
    }

    #[test]
    fn empty_meshes_are_skipped() {
        let dir = tempdir().unwrap();
        let mut meshes = ResourceManager::<Mesh>::new();
        let handle = meshes.create("nothing");
        let report =
            cook_physics_meshes(&meshes, &[handle], &BinaryCooking::default(), dir.path()).unwrap();
        assert_eq!(report.skipped, vec![Name::new("nothing")]);
        assert!(!dir.path().join("nothing.pm").exists());
    }
}
