//! Quickhull over 3D point clouds.
//!
//! Runs in double precision. Points within a small tolerance of a face,
//! relative to the extent of the cloud, count as inside, so points lying on
//! hull edges or faces never become hull vertices.

use std::cmp::Ordering;

use fxhash::{FxHashMap, FxHashSet};
use glam::{DVec3, Vec3};

const RELATIVE_TOLERANCE: f64 = 1e-6;

struct Face {
    vertices: [usize; 3],
    normal: DVec3,
    offset: f64,
    outside: Vec<usize>,
    alive: bool,
}

impl Face {
    fn new(points: &[DVec3], vertices: [usize; 3]) -> Self {
        let [a, b, c] = vertices.map(|vertex| points[vertex]);
        let normal = (b - a).cross(c - a).normalize_or_zero();
        Self {
            vertices,
            normal,
            offset: normal.dot(a),
            outside: Vec::new(),
            alive: true,
        }
    }

    fn distance(&self, point: DVec3) -> f64 {
        self.normal.dot(point) - self.offset
    }

    fn centroid(&self, points: &[DVec3]) -> DVec3 {
        self.vertices.iter().map(|&vertex| points[vertex]).sum::<DVec3>() / 3.0
    }

    fn edges(&self) -> [(usize, usize); 3] {
        let [a, b, c] = self.vertices;
        [(a, b), (b, c), (c, a)]
    }
}

fn axis_key(point: DVec3, axis: usize) -> [f64; 3] {
    [point[axis], point[(axis + 1) % 3], point[(axis + 2) % 3]]
}

fn compare_keys(a: [f64; 3], b: [f64; 3]) -> Ordering {
    a[0].total_cmp(&b[0])
        .then(a[1].total_cmp(&b[1]))
        .then(a[2].total_cmp(&b[2]))
}

/// Candidate maximizing `metric`. Near ties go to the candidate farthest
/// from `anchor`, which is always a vertex of the tied set and therefore of
/// the hull.
fn farthest(
    points: &[DVec3],
    candidates: &[usize],
    metric: impl Fn(DVec3) -> f64,
    anchor: DVec3,
    tolerance: f64,
) -> Option<(f64, usize)> {
    let best = candidates
        .iter()
        .map(|&index| metric(points[index]))
        .fold(f64::NEG_INFINITY, f64::max);
    candidates
        .iter()
        .copied()
        .filter(|&index| metric(points[index]) >= best - tolerance)
        .max_by(|&a, &b| {
            points[a]
                .distance_squared(anchor)
                .total_cmp(&points[b].distance_squared(anchor))
        })
        .map(|index| (best, index))
}

fn initial_simplex(points: &[DVec3], tolerance: f64) -> Option<[usize; 4]> {
    let all: Vec<usize> = (0..points.len()).collect();
    let mut extremes = Vec::with_capacity(6);
    for axis in 0..3 {
        let order = |&a: &usize, &b: &usize| {
            compare_keys(axis_key(points[a], axis), axis_key(points[b], axis))
        };
        extremes.push(all.iter().copied().min_by(order)?);
        extremes.push(all.iter().copied().max_by(order)?);
    }

    let mut widest = (0.0, 0, 0);
    for &a in &extremes {
        for &b in &extremes {
            let length = points[a].distance(points[b]);
            if length > widest.0 {
                widest = (length, a, b);
            }
        }
    }
    let (length, a, b) = widest;
    if length <= tolerance {
        return None;
    }

    let origin = points[a];
    let axis = (points[b] - origin) / length;
    let (height, c) = farthest(
        points,
        &all,
        |point| (point - origin).reject_from_normalized(axis).length(),
        origin,
        tolerance,
    )?;
    if height <= tolerance {
        return None;
    }

    let normal = axis.cross(points[c] - origin).normalize();
    let (depth, d) = farthest(
        points,
        &all,
        |point| (point - origin).dot(normal).abs(),
        origin,
        tolerance,
    )?;
    if depth <= tolerance {
        return None;
    }
    Some([a, b, c, d])
}

struct Quickhull<'a> {
    points: &'a [DVec3],
    tolerance: f64,
    faces: Vec<Face>,
    /// Directed edge to the face that owns it.
    edges: FxHashMap<(usize, usize), usize>,
}

impl Quickhull<'_> {
    fn add_face(&mut self, face: Face) -> usize {
        let index = self.faces.len();
        for edge in face.edges() {
            self.edges.insert(edge, index);
        }
        self.faces.push(face);
        index
    }

    /// Moves each candidate into the outside set of the face it lies
    /// farthest above. Candidates above none of `faces` are inside.
    fn assign(&mut self, candidates: impl IntoIterator<Item = usize>, faces: &[usize]) {
        for point in candidates {
            let position = self.points[point];
            let above = faces
                .iter()
                .map(|&face| (self.faces[face].distance(position), face))
                .filter(|&(distance, _)| distance > self.tolerance)
                .max_by(|a, b| a.0.total_cmp(&b.0));
            if let Some((_, face)) = above {
                self.faces[face].outside.push(point);
            }
        }
    }

    fn expand(&mut self, start: usize) {
        let face = &self.faces[start];
        let Some((_, eye)) = farthest(
            self.points,
            &face.outside,
            |point| face.distance(point),
            face.centroid(self.points),
            self.tolerance,
        ) else {
            return;
        };
        let eye_position = self.points[eye];

        let mut visible = vec![start];
        let mut seen = FxHashSet::default();
        seen.insert(start);
        let mut horizon = Vec::new();
        let mut next = 0;
        while next < visible.len() {
            let current = visible[next];
            next += 1;
            for (from, to) in self.faces[current].edges() {
                let Some(&neighbor) = self.edges.get(&(to, from)) else {
                    continue;
                };
                if seen.contains(&neighbor) {
                    continue;
                }
                if self.faces[neighbor].distance(eye_position) > self.tolerance {
                    seen.insert(neighbor);
                    visible.push(neighbor);
                } else {
                    horizon.push((from, to));
                }
            }
        }

        let mut orphans = Vec::new();
        for &index in &visible {
            let face = &mut self.faces[index];
            face.alive = false;
            orphans.append(&mut face.outside);
            for edge in face.edges() {
                self.edges.remove(&edge);
            }
        }

        let mut created = Vec::with_capacity(horizon.len());
        for (from, to) in horizon {
            let face = Face::new(self.points, [from, to, eye]);
            created.push(self.add_face(face));
        }
        self.assign(orphans.into_iter().filter(|&point| point != eye), &created);
    }
}

/// Indices of the hull vertices of `points`, ascending. `None` when the
/// points do not span a volume.
pub fn convex_hull(points: &[Vec3]) -> Option<Vec<usize>> {
    if points.len() < 4 {
        return None;
    }
    let points: Vec<DVec3> = points.iter().map(|point| point.as_dvec3()).collect();
    let (min, max) = points.iter().fold(
        (DVec3::splat(f64::MAX), DVec3::splat(f64::MIN)),
        |(min, max), &point| (min.min(point), max.max(point)),
    );
    let tolerance = (max - min).max_element() * RELATIVE_TOLERANCE;
    let simplex = initial_simplex(&points, tolerance)?;

    let mut hull = Quickhull {
        points: &points,
        tolerance,
        faces: Vec::new(),
        edges: FxHashMap::default(),
    };
    let [a, b, c, d] = simplex;
    let center = (points[a] + points[b] + points[c] + points[d]) / 4.0;
    for [x, y, z] in [[a, b, c], [a, b, d], [a, c, d], [b, c, d]] {
        let mut face = Face::new(&points, [x, y, z]);
        if face.distance(center) > 0.0 {
            face = Face::new(&points, [x, z, y]);
        }
        hull.add_face(face);
    }
    let initial: Vec<usize> = (0..hull.faces.len()).collect();
    hull.assign(
        (0..points.len()).filter(|point| !simplex.contains(point)),
        &initial,
    );

    while let Some(face) = hull
        .faces
        .iter()
        .position(|face| face.alive && !face.outside.is_empty())
    {
        hull.expand(face);
    }

    let mut vertices: Vec<usize> = hull
        .faces
        .iter()
        .filter(|face| face.alive)
        .flat_map(|face| face.vertices)
        .collect();
    vertices.sort_unstable();
    vertices.dedup();
    Some(vertices)
}

/// Keeps at most `limit` of `points`, picked by farthest point sampling so
/// the kept set still covers the whole shape. Order is preserved.
pub fn limit_vertices(points: &[Vec3], limit: usize) -> Vec<Vec3> {
    if points.len() <= limit {
        return points.to_vec();
    }
    let mut kept = Vec::with_capacity(limit);
    let mut nearest = vec![f32::INFINITY; points.len()];
    let mut next = 0;
    while kept.len() < limit {
        kept.push(next);
        let origin = points[next];
        for (distance, point) in nearest.iter_mut().zip(points) {
            *distance = distance.min(point.distance_squared(origin));
        }
        next = nearest
            .iter()
            .enumerate()
            .fold((0, f32::MIN), |best, (index, &distance)| {
                if distance > best.1 {
                    (index, distance)
                } else {
                    best
                }
            })
            .0;
    }
    kept.sort_unstable();
    kept.into_iter().map(|index| points[index]).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn cube_corners() -> Vec<Vec3> {
        let mut corners = Vec::new();
        for x in [-1.0, 1.0] {
            for y in [-1.0, 1.0] {
                for z in [-1.0, 1.0] {
                    corners.push(Vec3::new(x, y, z));
                }
            }
        }
        corners
    }

    /// Roughly even points on the unit sphere.
    pub(crate) fn sphere(count: usize) -> Vec<Vec3> {
        let golden = std::f32::consts::PI * (3.0 - 5f32.sqrt());
        (0..count)
            .map(|index| {
                let y = 1.0 - 2.0 * (index as f32 + 0.5) / count as f32;
                let radius = (1.0 - y * y).sqrt();
                let angle = golden * index as f32;
                Vec3::new(angle.cos() * radius, y, angle.sin() * radius)
            })
            .collect()
    }

    #[test]
    fn tetrahedron_is_its_own_hull() {
        let points = [Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::Z];
        assert_eq!(convex_hull(&points), Some(vec![0, 1, 2, 3]));
    }

    #[test]
    fn interior_points_are_dropped() {
        let mut points = cube_corners();
        points.insert(3, Vec3::ZERO);
        points.push(Vec3::new(0.5, -0.25, 0.1));
        assert_eq!(convex_hull(&points), Some(vec![0, 1, 2, 4, 5, 6, 7, 8]));
    }

    #[test]
    fn points_on_faces_and_edges_are_dropped() {
        let mut points = Vec::new();
        for z in [0.0, 1.0] {
            for y in 0..10 {
                for x in 0..10 {
                    points.push(Vec3::new(x as f32, y as f32, z));
                }
            }
        }
        let hull = convex_hull(&points).unwrap();
        let corners: Vec<Vec3> = hull.iter().map(|&index| points[index]).collect();
        assert_eq!(corners.len(), 8);
        assert!(corners
            .iter()
            .all(|corner| (corner.x == 0.0 || corner.x == 9.0) && (corner.y == 0.0 || corner.y == 9.0)));
    }

    #[test]
    fn points_on_a_sphere_are_all_vertices() {
        let points = sphere(300);
        assert_eq!(convex_hull(&points).map(|hull| hull.len()), Some(300));
    }

    #[test]
    fn flat_and_collinear_clouds_have_no_hull() {
        let flat = [Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::new(1.0, 1.0, 0.0)];
        assert_eq!(convex_hull(&flat), None);
        let line = [Vec3::ZERO, Vec3::X, Vec3::X * 2.0, Vec3::X * 3.0];
        assert_eq!(convex_hull(&line), None);
        assert_eq!(convex_hull(&[Vec3::ZERO, Vec3::X, Vec3::Y]), None);
    }

    #[test]
    fn limiting_keeps_order_and_spread() {
        let points = sphere(100);
        let kept = limit_vertices(&points, 20);
        assert_eq!(kept.len(), 20);
        let positions: Vec<usize> = kept
            .iter()
            .map(|point| points.iter().position(|candidate| candidate == point).unwrap())
            .collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
        // Spread over both hemispheres.
        assert!(kept.iter().any(|point| point.y > 0.5));
        assert!(kept.iter().any(|point| point.y < -0.5));
        assert_eq!(limit_vertices(&points[..10], 20).len(), 10);
    }
}
