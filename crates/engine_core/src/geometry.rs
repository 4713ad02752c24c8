// crates/engine_core/src/geometry.rs
//! Procedural meshes: grid, box, geosphere and quad patch.

use glam::{Vec2, Vec3};

use engine_shared::Vertex;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Indices narrowed to 16 bits. Meshes above 65535 vertices do not fit.
    pub fn indices16(&self) -> Vec<u16> {
        debug_assert!(self.vertices.len() <= usize::from(u16::MAX) + 1);
        self.indices.iter().map(|&i| i as u16).collect()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

fn vertex(pos: Vec3, normal: Vec3, tex: Vec2) -> Vertex {
    Vertex::new(pos.to_array(), normal.to_array(), tex.to_array())
}

#[derive(Copy, Clone, Debug, Default)]
pub struct GeometryGenerator;

impl GeometryGenerator {
    /// `m` x `n` vertices spanning `width` x `depth` in the xz-plane,
    /// centred on the origin.
    pub fn create_grid(&self, width: f32, depth: f32, m: u32, n: u32) -> MeshData {
        let mut mesh = MeshData::default();
        if m < 2 || n < 2 {
            return mesh;
        }

        let half_width = 0.5 * width;
        let half_depth = 0.5 * depth;
        let dx = width / (n - 1) as f32;
        let dz = depth / (m - 1) as f32;
        let du = 1.0 / (n - 1) as f32;
        let dv = 1.0 / (m - 1) as f32;

        mesh.vertices.reserve((m * n) as usize);
        for i in 0..m {
            let z = half_depth - i as f32 * dz;
            for j in 0..n {
                let x = -half_width + j as f32 * dx;
                mesh.vertices.push(vertex(
                    Vec3::new(x, 0.0, z),
                    Vec3::Y,
                    Vec2::new(j as f32 * du, i as f32 * dv),
                ));
            }
        }

        mesh.indices.reserve(((m - 1) * (n - 1) * 6) as usize);
        for i in 0..m - 1 {
            for j in 0..n - 1 {
                mesh.indices.extend_from_slice(&[
                    i * n + j,
                    i * n + j + 1,
                    (i + 1) * n + j,
                    (i + 1) * n + j,
                    i * n + j + 1,
                    (i + 1) * n + j + 1,
                ]);
            }
        }
        mesh
    }

    /// Axis-aligned box; each triangle is split `subdivisions` times (max 6).
    pub fn create_box(&self, width: f32, height: f32, depth: f32, subdivisions: u32) -> MeshData {
        let (w, h, d) = (0.5 * width, 0.5 * height, 0.5 * depth);
        let face = |corners: [Vec3; 4], normal: Vec3| -> [Vertex; 4] {
            let uv = [Vec2::new(0.0, 1.0), Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(1.0, 1.0)];
            [
                vertex(corners[0], normal, uv[0]),
                vertex(corners[1], normal, uv[1]),
                vertex(corners[2], normal, uv[2]),
                vertex(corners[3], normal, uv[3]),
            ]
        };

        let faces = [
            // front
            face([Vec3::new(-w, -h, -d), Vec3::new(-w, h, -d), Vec3::new(w, h, -d), Vec3::new(w, -h, -d)], Vec3::NEG_Z),
            // back
            face([Vec3::new(w, -h, d), Vec3::new(w, h, d), Vec3::new(-w, h, d), Vec3::new(-w, -h, d)], Vec3::Z),
            // top
            face([Vec3::new(-w, h, -d), Vec3::new(-w, h, d), Vec3::new(w, h, d), Vec3::new(w, h, -d)], Vec3::Y),
            // bottom
            face([Vec3::new(-w, -h, d), Vec3::new(-w, -h, -d), Vec3::new(w, -h, -d), Vec3::new(w, -h, d)], Vec3::NEG_Y),
            // left
            face([Vec3::new(-w, -h, d), Vec3::new(-w, h, d), Vec3::new(-w, h, -d), Vec3::new(-w, -h, -d)], Vec3::NEG_X),
            // right
            face([Vec3::new(w, -h, -d), Vec3::new(w, h, -d), Vec3::new(w, h, d), Vec3::new(w, -h, d)], Vec3::X),
        ];

        let mut mesh = MeshData::default();
        for (f, quad) in faces.iter().enumerate() {
            let base = (f * 4) as u32;
            mesh.vertices.extend_from_slice(quad);
            mesh.indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        for _ in 0..subdivisions.min(6) {
            subdivide(&mut mesh);
        }
        mesh
    }

    /// Icosahedron subdivided `subdivisions` times (max 6) and projected
    /// onto the sphere.
    pub fn create_geosphere(&self, radius: f32, subdivisions: u32) -> MeshData {
        const X: f32 = 0.525_731;
        const Z: f32 = 0.850_651;
        let positions = [
            Vec3::new(-X, 0.0, Z),
            Vec3::new(X, 0.0, Z),
            Vec3::new(-X, 0.0, -Z),
            Vec3::new(X, 0.0, -Z),
            Vec3::new(0.0, Z, X),
            Vec3::new(0.0, Z, -X),
            Vec3::new(0.0, -Z, X),
            Vec3::new(0.0, -Z, -X),
            Vec3::new(Z, X, 0.0),
            Vec3::new(-Z, X, 0.0),
            Vec3::new(Z, -X, 0.0),
            Vec3::new(-Z, -X, 0.0),
        ];
        #[rustfmt::skip]
        let indices: [u32; 60] = [
            1, 4, 0,   4, 9, 0,   4, 5, 9,   8, 5, 4,   1, 8, 4,
            1, 10, 8,  10, 3, 8,  8, 3, 5,   3, 2, 5,   3, 7, 2,
            3, 10, 7,  10, 6, 7,  6, 11, 7,  6, 0, 11,  6, 1, 0,
            10, 1, 6,  11, 0, 9,  2, 11, 9,  5, 2, 9,   11, 2, 7,
        ];

        let mut mesh = MeshData {
            vertices: positions.iter().map(|p| vertex(*p, Vec3::ZERO, Vec2::ZERO)).collect(),
            indices: indices.to_vec(),
        };
        for _ in 0..subdivisions.min(6) {
            subdivide(&mut mesh);
        }

        for v in &mut mesh.vertices {
            let n = Vec3::from(v.pos).normalize();
            let p = n * radius;
            let theta = {
                let t = n.z.atan2(n.x);
                if t < 0.0 {
                    t + std::f32::consts::TAU
                } else {
                    t
                }
            };
            let phi = (p.y / radius).clamp(-1.0, 1.0).acos();
            *v = vertex(
                p,
                n,
                Vec2::new(theta / std::f32::consts::TAU, phi / std::f32::consts::PI),
            );
        }
        mesh
    }

    /// Four control points of a square patch in the xz-plane, for the
    /// tessellation pipeline.
    pub fn create_quad_patch(&self, size: f32) -> MeshData {
        let h = 0.5 * size;
        let corners = [
            (Vec3::new(-h, 0.0, h), Vec2::new(0.0, 0.0)),
            (Vec3::new(h, 0.0, h), Vec2::new(1.0, 0.0)),
            (Vec3::new(-h, 0.0, -h), Vec2::new(0.0, 1.0)),
            (Vec3::new(h, 0.0, -h), Vec2::new(1.0, 1.0)),
        ];
        MeshData {
            vertices: corners.iter().map(|(p, uv)| vertex(*p, Vec3::Y, *uv)).collect(),
            indices: vec![0, 1, 2, 3],
        }
    }
}

/// Splits every triangle into four through its edge midpoints.
fn subdivide(mesh: &mut MeshData) {
    let input = std::mem::take(mesh);
    let mid = |a: &Vertex, b: &Vertex| -> Vertex {
        let p = 0.5 * (Vec3::from(a.pos) + Vec3::from(b.pos));
        let n = (Vec3::from(a.normal) + Vec3::from(b.normal)).normalize_or_zero();
        let t = 0.5 * (Vec2::from(a.tex_c) + Vec2::from(b.tex_c));
        vertex(p, n, t)
    };

    for tri in input.indices.chunks_exact(3) {
        let v0 = input.vertices[tri[0] as usize];
        let v1 = input.vertices[tri[1] as usize];
        let v2 = input.vertices[tri[2] as usize];
        let (m0, m1, m2) = (mid(&v0, &v1), mid(&v1, &v2), mid(&v0, &v2));

        let base = mesh.vertices.len() as u32;
        mesh.vertices.extend_from_slice(&[v0, v1, v2, m0, m1, m2]);
        mesh.indices.extend_from_slice(&[
            base, base + 3, base + 5,
            base + 3, base + 4, base + 5,
            base + 5, base + 4, base + 2,
            base + 3, base + 1, base + 4,
        ]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hills_grid_sizes() {
        let grid = GeometryGenerator.create_grid(160.0, 160.0, 50, 50);
        assert_eq!(grid.vertices.len(), 50 * 50);
        assert_eq!(grid.triangle_count(), 49 * 49 * 2);
        assert_eq!(grid.indices.len(), 49 * 49 * 6);
        assert_eq!(grid.indices16().len(), grid.indices.len());
    }

    #[test]
    fn grid_spans_its_extent() {
        let grid = GeometryGenerator.create_grid(10.0, 4.0, 3, 3);
        assert_eq!(grid.vertices[0].pos, [-5.0, 0.0, 2.0]);
        assert_eq!(grid.vertices[8].pos, [5.0, 0.0, -2.0]);
        assert_eq!(grid.vertices[8].tex_c, [1.0, 1.0]);
    }

    #[test]
    fn box_has_six_faces() {
        let b = GeometryGenerator.create_box(1.0, 2.0, 3.0, 0);
        assert_eq!(b.vertices.len(), 24);
        assert_eq!(b.triangle_count(), 12);
        let sub = GeometryGenerator.create_box(1.0, 1.0, 1.0, 1);
        assert_eq!(sub.triangle_count(), 48);
    }

    #[test]
    fn geosphere_vertices_lie_on_the_sphere() {
        let s = GeometryGenerator.create_geosphere(2.5, 2);
        assert_eq!(s.triangle_count(), 20 * 16);
        for v in &s.vertices {
            assert!((Vec3::from(v.pos).length() - 2.5).abs() < 1e-4);
        }
    }

    #[test]
    fn quad_patch_is_four_control_points() {
        let p = GeometryGenerator.create_quad_patch(10.0);
        assert_eq!(p.vertices.len(), 4);
        assert_eq!(p.indices, vec![0, 1, 2, 3]);
    }
}
