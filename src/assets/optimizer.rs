//! Linear-speed vertex cache optimization after Tom Forsyth.
//!
//! Reorders triangles so vertices are reused while they are still in a
//! simulated LRU post-transform cache. Vertex indices are not changed,
//! only the order of the triangles.

/// Simulated cache size used by the mesh importer.
pub const DEFAULT_CACHE_SIZE: u32 = 32;

const MAX_CACHE_SIZE: u32 = 64;
const MAX_PRECOMPUTED_VALENCE: u32 = 64;

const CACHE_DECAY_POWER: f32 = 1.5;
const LAST_TRIANGLE_SCORE: f32 = 0.75;
const VALENCE_BOOST_SCALE: f32 = 2.0;
const VALENCE_BOOST_POWER: f32 = 0.5;

const EVICTED: u32 = u32::MAX;

fn cache_score(position: u32, cache_size: u32) -> f32 {
    if position < 3 {
        // Whichever corner of the last triangle, same score.
        LAST_TRIANGLE_SCORE
    } else {
        let scaler = 1.0 / (cache_size - 3) as f32;
        (1.0 - (position - 3) as f32 * scaler).powf(CACHE_DECAY_POWER)
    }
}

fn valence_score(active_faces: u32) -> f32 {
    VALENCE_BOOST_SCALE * (active_faces as f32).powf(-VALENCE_BOOST_POWER)
}

struct ScoreTable {
    cache_size: u32,
    cache: Vec<f32>,
    valence: Vec<f32>,
}

impl ScoreTable {
    fn new(cache_size: u32) -> Self {
        Self {
            cache_size,
            cache: (0..cache_size).map(|pos| cache_score(pos, cache_size)).collect(),
            valence: (0..MAX_PRECOMPUTED_VALENCE).map(valence_score).collect(),
        }
    }

    fn vertex_score(&self, active_faces: u32, cache_position: u32) -> f32 {
        if active_faces == 0 {
            return -1.0;
        }
        let mut score = 0.0;
        if cache_position < self.cache_size {
            score += self.cache[cache_position as usize];
        }
        score += match self.valence.get(active_faces as usize) {
            Some(&precomputed) => precomputed,
            None => valence_score(active_faces),
        };
        score
    }
}

#[derive(Debug, Clone, Copy)]
struct VertexData {
    score: f32,
    face_list_start: u32,
    face_list_size: u32,
    cache_pos0: u32,
    cache_pos1: u32,
}

/// Returns `indices` with its triangles reordered for cache locality.
///
/// # Panics
/// If `cache_size` is not in `4..=64` or an index is `>= vertex_count`.
pub fn optimize_faces(indices: &[u32], vertex_count: u32, cache_size: u32) -> Vec<u32> {
    assert!(
        (4..=MAX_CACHE_SIZE).contains(&cache_size),
        "cache size {cache_size} out of range"
    );
    let index_count = indices.len() - indices.len() % 3;
    let indices = &indices[..index_count];
    if indices.is_empty() {
        return Vec::new();
    }
    let table = ScoreTable::new(cache_size);

    let mut vertices = vec![
        VertexData {
            score: 0.0,
            face_list_start: 0,
            face_list_size: 0,
            cache_pos0: EVICTED,
            cache_pos1: EVICTED,
        };
        vertex_count as usize
    ];
    for &index in indices {
        assert!(index < vertex_count, "index {index} out of range");
        vertices[index as usize].face_list_size += 1;
    }

    let mut next_start = 0;
    for vertex in &mut vertices {
        vertex.face_list_start = next_start;
        next_start += vertex.face_list_size;
        vertex.score = table.vertex_score(vertex.face_list_size, vertex.cache_pos0);
        vertex.face_list_size = 0;
    }
    // Faces are identified by the offset of their first index.
    let mut active_faces = vec![0u32; next_start as usize];
    for face in (0..index_count).step_by(3) {
        for &index in &indices[face..face + 3] {
            let vertex = &mut vertices[index as usize];
            active_faces[(vertex.face_list_start + vertex.face_list_size) as usize] = face as u32;
            vertex.face_list_size += 1;
        }
    }

    let mut processed = vec![false; index_count];
    let mut output = vec![0u32; index_count];
    let mut cache0: Vec<u32> = Vec::with_capacity((MAX_CACHE_SIZE + 3) as usize);
    let mut cache1: Vec<u32> = Vec::with_capacity((MAX_CACHE_SIZE + 3) as usize);
    let mut best_face = 0usize;
    let mut best_score = -1.0f32;
    let max_valence_score = table.vertex_score(1, EVICTED) * 3.0;

    for out in (0..index_count).step_by(3) {
        if best_score < 0.0 {
            // Nothing in the cache is used by an unprocessed face, start over
            // at the best scoring remaining face.
            for face in (0..index_count).step_by(3) {
                if processed[face] {
                    continue;
                }
                let score: f32 = indices[face..face + 3]
                    .iter()
                    .map(|&index| vertices[index as usize].score)
                    .sum();
                if score > best_score {
                    best_score = score;
                    best_face = face;
                    if best_score >= max_valence_score {
                        break;
                    }
                }
            }
        }

        processed[best_face] = true;
        cache1.clear();

        for corner in 0..3 {
            let index = indices[best_face + corner];
            output[out + corner] = index;
            let vertex = &mut vertices[index as usize];

            if vertex.cache_pos1 as usize >= cache1.len() {
                vertex.cache_pos1 = cache1.len() as u32;
                cache1.push(index);
                if vertex.face_list_size == 1 {
                    vertex.face_list_size = 0;
                    continue;
                }
            }

            let start = vertex.face_list_start as usize;
            let end = start + vertex.face_list_size as usize;
            let list = &mut active_faces[start..end];
            if let Some(position) = list.iter().position(|&face| face as usize == best_face) {
                list.swap(position, list.len() - 1);
            }
            vertex.face_list_size -= 1;
            vertex.score = table.vertex_score(vertex.face_list_size, vertex.cache_pos1);
        }

        // Older entries move down behind the new triangle.
        for &index in &cache0 {
            let vertex = &mut vertices[index as usize];
            if vertex.cache_pos1 as usize >= cache1.len() {
                vertex.cache_pos1 = cache1.len() as u32;
                cache1.push(index);
                vertex.score = table.vertex_score(vertex.face_list_size, vertex.cache_pos1);
            }
        }

        best_score = -1.0;
        for &index in &cache1 {
            let (start, end) = {
                let vertex = &mut vertices[index as usize];
                vertex.cache_pos0 = vertex.cache_pos1;
                vertex.cache_pos1 = EVICTED;
                let start = vertex.face_list_start as usize;
                (start, start + vertex.face_list_size as usize)
            };
            for &face in &active_faces[start..end] {
                let face = face as usize;
                let score: f32 = indices[face..face + 3]
                    .iter()
                    .map(|&i| vertices[i as usize].score)
                    .sum();
                if score > best_score {
                    best_score = score;
                    best_face = face;
                }
            }
        }

        std::mem::swap(&mut cache0, &mut cache1);
        cache0.truncate(cache_size as usize);
    }
    output
}

/// Average post-transform cache misses per triangle for a FIFO cache.
pub fn average_cache_miss_ratio(indices: &[u32], cache_size: usize) -> f32 {
    let triangles = indices.len() / 3;
    if triangles == 0 {
        return 0.0;
    }
    let mut cache = std::collections::VecDeque::with_capacity(cache_size);
    let mut misses = 0usize;
    for &index in indices {
        if !cache.contains(&index) {
            misses += 1;
            if cache.len() == cache_size {
                cache.pop_front();
            }
            cache.push_back(index);
        }
    }
    misses as f32 / triangles as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(size: u32) -> (Vec<u32>, u32) {
        let row = size + 1;
        let mut indices = Vec::new();
        for y in 0..size {
            for x in 0..size {
                let i = y * row + x;
                indices.extend_from_slice(&[i, i + 1, i + row, i + 1, i + row + 1, i + row]);
            }
        }
        (indices, row * row)
    }

    fn sorted_triangles(indices: &[u32]) -> Vec<[u32; 3]> {
        let mut triangles: Vec<[u32; 3]> = indices
            .chunks_exact(3)
            .map(|t| [t[0], t[1], t[2]])
            .collect();
        triangles.sort_unstable();
        triangles
    }

    #[test]
    fn output_is_a_permutation_of_the_triangles() {
        let (indices, vertex_count) = grid(12);
        let optimized = optimize_faces(&indices, vertex_count, DEFAULT_CACHE_SIZE);
        assert_eq!(optimized.len(), indices.len());
        assert_eq!(sorted_triangles(&optimized), sorted_triangles(&indices));
    }

    #[test]
    fn improves_locality_of_a_shuffled_grid() {
        let (indices, vertex_count) = grid(24);
        // Deterministic shuffle of whole triangles.
        let mut triangles: Vec<&[u32]> = indices.chunks_exact(3).collect();
        let count = triangles.len();
        for i in 0..count {
            triangles.swap(i, (i * 7919 + 13) % count);
        }
        let shuffled: Vec<u32> = triangles.concat();
        let optimized = optimize_faces(&shuffled, vertex_count, DEFAULT_CACHE_SIZE);
        assert!(
            average_cache_miss_ratio(&optimized, 32) < average_cache_miss_ratio(&shuffled, 32)
        );
    }

    #[test]
    fn empty_input_is_fine() {
        assert!(optimize_faces(&[], 0, DEFAULT_CACHE_SIZE).is_empty());
    }
}
