use std::collections::HashMap;

use glam::Vec3;

use crate::error::{RenderError, RenderResult};

/// Tetrahedral reference mesh with its boundary surface.
///
/// All tables are flat: 3 floats per vertex, 3 indices per triangle,
/// 4 per tetrahedron and 6 per adjacency entry.
#[derive(Clone, Debug)]
pub struct Mesh {
    vertices: Vec<f32>,
    normals: Vec<f32>,
    triangles: Vec<u32>,
    triangles_adjacency: Vec<u32>,
    tetrahedra: Vec<u32>,
    min_vertex: Vec3,
    max_vertex: Vec3,
}

impl Mesh {
    pub fn new(vertices: Vec<f32>, triangles: Vec<u32>, tetrahedra: Vec<u32>) -> RenderResult<Self> {
        if vertices.len() % 3 != 0 {
            return Err(RenderError::InvalidMesh(format!(
                "vertex table length {} is not a multiple of 3",
                vertices.len()
            )));
        }
        if triangles.len() % 3 != 0 {
            return Err(RenderError::InvalidMesh(format!(
                "triangle table length {} is not a multiple of 3",
                triangles.len()
            )));
        }
        if tetrahedra.len() % 4 != 0 {
            return Err(RenderError::InvalidMesh(format!(
                "tetrahedron table length {} is not a multiple of 4",
                tetrahedra.len()
            )));
        }

        let vertex_count = (vertices.len() / 3) as u32;
        if let Some(index) = triangles.iter().chain(&tetrahedra).find(|&&i| i >= vertex_count) {
            return Err(RenderError::InvalidMesh(format!(
                "index {index} out of range for {vertex_count} vertices"
            )));
        }

        let (min_vertex, max_vertex) = bounds(&vertices);
        let triangles_adjacency = generate_adjacency(&triangles);
        let normals = generate_normals(&vertices, &triangles);

        Ok(Self {
            vertices,
            normals,
            triangles,
            triangles_adjacency,
            tetrahedra,
            min_vertex,
            max_vertex,
        })
    }

    pub fn vertices(&self) -> &[f32] {
        &self.vertices
    }

    pub fn normals(&self) -> &[f32] {
        &self.normals
    }

    pub fn triangles(&self) -> &[u32] {
        &self.triangles
    }

    pub fn triangles_adjacency(&self) -> &[u32] {
        &self.triangles_adjacency
    }

    pub fn tetrahedra(&self) -> &[u32] {
        &self.tetrahedra
    }

    pub fn number_of_vertices(&self) -> usize {
        self.vertices.len() / 3
    }

    pub fn number_of_triangles(&self) -> usize {
        self.triangles.len() / 3
    }

    pub fn number_of_triangles_adjacency(&self) -> usize {
        self.triangles_adjacency.len() / 6
    }

    pub fn number_of_tetrahedra(&self) -> usize {
        self.tetrahedra.len() / 4
    }

    pub fn min_vertex(&self) -> Vec3 {
        self.min_vertex
    }

    pub fn max_vertex(&self) -> Vec3 {
        self.max_vertex
    }

    pub fn vertex(&self, index: usize) -> Vec3 {
        Vec3::from_slice(&self.vertices[index * 3..index * 3 + 3])
    }

    pub fn triangle(&self, index: usize) -> [u32; 3] {
        [
            self.triangles[index * 3],
            self.triangles[index * 3 + 1],
            self.triangles[index * 3 + 2],
        ]
    }

    pub fn triangles_2d(&self) -> Vec<[u32; 3]> {
        (0..self.number_of_triangles()).map(|i| self.triangle(i)).collect()
    }
}

fn bounds(vertices: &[f32]) -> (Vec3, Vec3) {
    if vertices.is_empty() {
        return (Vec3::ZERO, Vec3::ZERO);
    }
    vertices
        .chunks_exact(3)
        .map(Vec3::from_slice)
        .fold((Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)), |(min, max), v| {
            (min.min(v), max.max(v))
        })
}

/// For every triangle: its three vertices, then the vertex opposite each
/// edge (t0,t1), (t1,t2), (t2,t0) in the neighbouring triangle.
///
/// An edge without a reverse neighbour falls back to the triangle's own
/// opposite vertex, which turns the silhouette test for that edge into a
/// no-op.
pub fn generate_adjacency(triangles: &[u32]) -> Vec<u32> {
    let mut opposite: HashMap<(u32, u32), u32> = HashMap::with_capacity(triangles.len());
    for t in triangles.chunks_exact(3) {
        opposite.insert((t[0], t[1]), t[2]);
        opposite.insert((t[1], t[2]), t[0]);
        opposite.insert((t[2], t[0]), t[1]);
    }

    let mut open_edges = 0usize;
    let mut lookup = |a: u32, b: u32, fallback: u32| match opposite.get(&(b, a)) {
        Some(&v) => v,
        None => {
            open_edges += 1;
            fallback
        }
    };

    let mut adjacency = Vec::with_capacity(triangles.len() * 2);
    for t in triangles.chunks_exact(3) {
        let e01 = lookup(t[0], t[1], t[2]);
        let e12 = lookup(t[1], t[2], t[0]);
        let e20 = lookup(t[2], t[0], t[1]);
        adjacency.extend_from_slice(&[t[0], t[1], t[2], e01, e12, e20]);
    }

    if open_edges > 0 {
        log::warn!("Mesh surface has {open_edges} open edges, silhouettes along them are suppressed");
    }
    adjacency
}

/// Area-weighted vertex normals, `cross(c - a, b - a)` per face.
pub fn generate_normals(vertices: &[f32], triangles: &[u32]) -> Vec<f32> {
    let mut accumulated = vec![Vec3::ZERO; vertices.len() / 3];
    let point = |i: u32| Vec3::from_slice(&vertices[i as usize * 3..i as usize * 3 + 3]);

    for t in triangles.chunks_exact(3) {
        let (a, b, c) = (point(t[0]), point(t[1]), point(t[2]));
        let face = (c - a).cross(b - a);
        for &i in t {
            accumulated[i as usize] += face;
        }
    }

    accumulated
        .into_iter()
        .flat_map(|n| n.normalize_or_zero().to_array())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tetrahedron_shell() -> Mesh {
        let vertices = vec![
            0.0, 0.0, 0.0, //
            1.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, //
            0.0, 0.0, 1.0,
        ];
        // consistent winding, every directed edge appears reversed once
        let triangles = vec![0, 2, 1, 0, 1, 3, 1, 2, 3, 2, 0, 3];
        Mesh::new(vertices, triangles, vec![0, 1, 2, 3]).unwrap()
    }

    fn third_vertex(tri: &[u32], a: u32, b: u32) -> u32 {
        *tri.iter().find(|&&v| v != a && v != b).unwrap()
    }

    #[test]
    fn adjacency_on_closed_shell() {
        let mesh = tetrahedron_shell();
        let triangles = mesh.triangles_2d();
        assert_eq!(mesh.number_of_triangles_adjacency(), 4);

        for (i, tri) in triangles.iter().enumerate() {
            let adj = &mesh.triangles_adjacency()[i * 6..i * 6 + 6];
            assert_eq!(&adj[..3], tri);

            for (slot, (a, b)) in [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])]
                .into_iter()
                .enumerate()
            {
                let neighbour = triangles
                    .iter()
                    .enumerate()
                    .find(|(j, t)| *j != i && t.contains(&a) && t.contains(&b))
                    .map(|(_, t)| t)
                    .unwrap();
                assert_eq!(adj[3 + slot], third_vertex(neighbour, a, b));
            }
        }
    }

    #[test]
    fn open_edges_fall_back_to_own_vertex() {
        let adjacency = generate_adjacency(&[0, 1, 2]);
        assert_eq!(adjacency, vec![0, 1, 2, 2, 0, 1]);
    }

    #[test]
    fn normals_are_unit_and_area_weighted() {
        let mesh = tetrahedron_shell();
        for n in mesh.normals().chunks_exact(3) {
            assert_relative_eq!(Vec3::from_slice(n).length(), 1.0, epsilon = 1e-5);
        }

        // two faces sharing vertex 0: a large one in z=0 and a small one in y=0
        let vertices = vec![
            0.0, 0.0, 0.0, //
            4.0, 0.0, 0.0, //
            0.0, 4.0, 0.0, //
            0.0, 0.0, 1.0,
        ];
        let normals = generate_normals(&vertices, &[0, 1, 2, 0, 3, 1]);
        let n0 = Vec3::from_slice(&normals[0..3]);
        // the z=0 face has four times the area, so its direction dominates
        assert!(n0.z.abs() > n0.y.abs());
        assert_relative_eq!(n0.length(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn bounds_and_counts() {
        let mesh = tetrahedron_shell();
        assert_eq!(mesh.number_of_vertices(), 4);
        assert_eq!(mesh.number_of_triangles(), 4);
        assert_eq!(mesh.number_of_tetrahedra(), 1);
        assert_eq!(mesh.min_vertex(), Vec3::ZERO);
        assert_eq!(mesh.max_vertex(), Vec3::ONE);
    }

    #[test]
    fn rejects_out_of_range_indices() {
        let result = Mesh::new(vec![0.0; 9], vec![0, 1, 3], vec![]);
        assert!(matches!(result, Err(RenderError::InvalidMesh(_))));
    }
}
