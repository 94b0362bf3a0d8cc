//! Procedural shape and density models used by the demo binaries and the
//! end-to-end tests.

use glam::{UVec3, Vec3};

use crate::error::RenderResult;
use crate::model::{Mesh, StatisticalData};
use crate::renderer::density_shader::{bernstein_tuples, coeffs_count_from_degree};

pub struct SyntheticModel {
    pub mesh: Mesh,
    pub shape: StatisticalData,
    pub density: StatisticalData,
    pub degree: u32,
}

impl SyntheticModel {
    /// Axis-aligned box of `cells` grid cells, centred at the origin, every
    /// cell split into six tetrahedra.
    ///
    /// Shape modes: uniform scale, bend along x, twist about z.
    /// Density modes: linear ramp along z, alternating per tetrahedron.
    pub fn boxed(cells: UVec3, size: Vec3, degree: u32, base_density: f32) -> RenderResult<Self> {
        let cells = cells.max(UVec3::ONE);
        let half = size / 2.0;
        let step = size / cells.as_vec3();

        let (nx, ny, nz) = (cells.x + 1, cells.y + 1, cells.z + 1);
        let index = |i: u32, j: u32, k: u32| i + nx * (j + ny * k);

        let mut vertices = Vec::with_capacity((nx * ny * nz * 3) as usize);
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let p = -half + step * Vec3::new(i as f32, j as f32, k as f32);
                    vertices.extend_from_slice(&p.to_array());
                }
            }
        }

        let mut tetrahedra = Vec::new();
        for k in 0..cells.z {
            for j in 0..cells.y {
                for i in 0..cells.x {
                    let corner = |bits: u32| index(i + (bits & 1), j + ((bits >> 1) & 1), k + ((bits >> 2) & 1));
                    // Kuhn split: one tetrahedron per axis ordering, all sharing the main diagonal
                    for (a, b) in [(1, 2), (1, 4), (2, 1), (2, 4), (4, 1), (4, 2)] {
                        tetrahedra.extend_from_slice(&[corner(0), corner(a), corner(a | b), corner(7)]);
                    }
                }
            }
        }

        let point = |v: u32| Vec3::from_slice(&vertices[v as usize * 3..v as usize * 3 + 3]);
        let mut triangles = Vec::new();
        let mut push_quad = |quad: [u32; 4], outward: Vec3| {
            let [a, b, c, d] = quad;
            let normal = (point(b) - point(a)).cross(point(c) - point(a));
            if normal.dot(outward) >= 0.0 {
                triangles.extend_from_slice(&[a, b, c, a, c, d]);
            } else {
                triangles.extend_from_slice(&[a, c, b, a, d, c]);
            }
        };

        for k in 0..cells.z {
            for j in 0..cells.y {
                push_quad([index(0, j, k), index(0, j + 1, k), index(0, j + 1, k + 1), index(0, j, k + 1)], -Vec3::X);
                let x = cells.x;
                push_quad([index(x, j, k), index(x, j + 1, k), index(x, j + 1, k + 1), index(x, j, k + 1)], Vec3::X);
            }
        }
        for k in 0..cells.z {
            for i in 0..cells.x {
                push_quad([index(i, 0, k), index(i + 1, 0, k), index(i + 1, 0, k + 1), index(i, 0, k + 1)], -Vec3::Y);
                let y = cells.y;
                push_quad([index(i, y, k), index(i + 1, y, k), index(i + 1, y, k + 1), index(i, y, k + 1)], Vec3::Y);
            }
        }
        for j in 0..cells.y {
            for i in 0..cells.x {
                push_quad([index(i, j, 0), index(i + 1, j, 0), index(i + 1, j + 1, 0), index(i, j + 1, 0)], -Vec3::Z);
                let z = cells.z;
                push_quad([index(i, j, z), index(i + 1, j, z), index(i + 1, j + 1, z), index(i, j + 1, z)], Vec3::Z);
            }
        }

        let shape = shape_model(&vertices, half)?;
        let density = density_model(&vertices, &tetrahedra, half, degree, base_density)?;
        let mesh = Mesh::new(vertices, triangles, tetrahedra)?;

        Ok(Self {
            mesh,
            shape,
            density,
            degree,
        })
    }

    /// One tetrahedron with corners at the origin and `scale` along each
    /// axis, with a constant density of `value` at any degree.
    pub fn tetrahedron(scale: f32, degree: u32, value: f32) -> RenderResult<Self> {
        let vertices = vec![
            0.0, 0.0, 0.0, //
            scale, 0.0, 0.0, //
            0.0, scale, 0.0, //
            0.0, 0.0, scale,
        ];
        let triangles = vec![0, 2, 1, 0, 1, 3, 1, 2, 3, 2, 0, 3];
        let tetrahedra = vec![0, 1, 2, 3];

        let shape = StatisticalData::from_mean_and_basis(vertices.clone(), vertices.clone(), 1)?;
        let count = coeffs_count_from_degree(degree) as usize;
        let density = StatisticalData::from_mean_and_basis(vec![value; count], vec![1.0; count], 1)?;
        let mesh = Mesh::new(vertices, triangles, tetrahedra)?;

        Ok(Self {
            mesh,
            shape,
            density,
            degree,
        })
    }
}

fn shape_model(vertices: &[f32], half: Vec3) -> RenderResult<StatisticalData> {
    const MODES: usize = 3;
    let mut basis = Vec::with_capacity(vertices.len() * MODES);

    for v in vertices.chunks_exact(3) {
        let p = Vec3::from_slice(v);
        let u = p / half.max(Vec3::splat(f32::EPSILON));

        let scale = p;
        let bend = Vec3::new(0.0, u.x * u.x * half.y * 0.5, 0.0);
        let twist = Vec3::new(-p.y, p.x, 0.0) * u.z * 0.5;

        for axis in 0..3 {
            basis.extend_from_slice(&[scale[axis], bend[axis], twist[axis]]);
        }
    }

    StatisticalData::from_mean_and_basis(vertices.to_vec(), basis, MODES)
}

/// Bernstein coefficients at the domain points of every tetrahedron.
///
/// A linear field sampled at the domain points is reproduced exactly for any
/// degree of at least one.
fn density_model(
    vertices: &[f32],
    tetrahedra: &[u32],
    half: Vec3,
    degree: u32,
    base_density: f32,
) -> RenderResult<StatisticalData> {
    const MODES: usize = 2;
    let tuples = bernstein_tuples(degree);
    let count = tuples.len() * tetrahedra.len() / 4;
    let point = |v: u32| Vec3::from_slice(&vertices[v as usize * 3..v as usize * 3 + 3]);

    let mut mean = Vec::with_capacity(count);
    let mut basis = Vec::with_capacity(count * MODES);

    for (t, tet) in tetrahedra.chunks_exact(4).enumerate() {
        let corners = [point(tet[0]), point(tet[1]), point(tet[2]), point(tet[3])];
        let sign = if t % 2 == 0 { 0.5 } else { -0.5 };
        let alternating = sign * base_density;

        for tuple in &tuples {
            let domain_point = if degree == 0 {
                corners.iter().sum::<Vec3>() / 4.0
            } else {
                tuple
                    .iter()
                    .zip(&corners)
                    .map(|(&weight, &corner)| corner * weight as f32)
                    .sum::<Vec3>()
                    / degree as f32
            };
            let ramp = domain_point.z / half.z.max(f32::EPSILON) * base_density;

            mean.push(base_density);
            basis.extend_from_slice(&[ramp, alternating]);
        }
    }

    StatisticalData::from_mean_and_basis(mean, basis, MODES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_mesh_is_consistent() {
        let model = SyntheticModel::boxed(UVec3::new(2, 1, 1), Vec3::new(2.0, 1.0, 1.0), 2, 1.0).unwrap();
        let mesh = &model.mesh;

        assert_eq!(mesh.number_of_vertices(), 3 * 2 * 2);
        assert_eq!(mesh.number_of_tetrahedra(), 2 * 6);
        // 2 * (2 + 2 + 1) quads
        assert_eq!(mesh.number_of_triangles(), 2 * 10);

        // closed surface: every directed edge has its reverse
        let triangles = mesh.triangles();
        for t in triangles.chunks_exact(3) {
            for (a, b) in [(t[0], t[1]), (t[1], t[2]), (t[2], t[0])] {
                let reversed = triangles
                    .chunks_exact(3)
                    .any(|o| [(o[0], o[1]), (o[1], o[2]), (o[2], o[0])].contains(&(b, a)));
                assert!(reversed, "edge {a}-{b} has no neighbour");
            }
        }
    }

    #[test]
    fn model_dimensions_follow_mesh() {
        let model = SyntheticModel::boxed(UVec3::splat(2), Vec3::splat(10.0), 3, 2.0).unwrap();
        let count = coeffs_count_from_degree(3) as usize;
        assert_eq!(model.shape.number_of_rows(), model.mesh.number_of_vertices() * 3);
        assert_eq!(model.density.number_of_rows(), model.mesh.number_of_tetrahedra() * count);
        assert!(model.density.mean().iter().all(|&v| v == 2.0));
    }

    #[test]
    fn scale_mode_scales_vertices() {
        let mut model = SyntheticModel::boxed(UVec3::ONE, Vec3::splat(2.0), 0, 1.0).unwrap();
        model.shape.update_pcs(0, 1.0).unwrap();
        let scaled = model.shape.reconstruct();
        for (s, m) in scaled.iter().zip(model.shape.mean()) {
            assert!((s - 2.0 * m).abs() < 1e-5);
        }
    }
}
