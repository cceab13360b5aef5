//! Mesh generators for common shapes.

use super::data::MeshData;

/// Generate an axis-aligned cube centered at the origin.
///
/// Each face has its own four vertices so normals, UVs and tangents are
/// flat per face (24 vertices, 36 indices). Triangles wind counter-clockwise
/// when viewed from outside.
pub fn generate_cube(half_extent: f32) -> MeshData {
    // (normal, tangent) per face; bitangent = normal x tangent.
    const FACES: [([f32; 3], [f32; 3]); 6] = [
        ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0]),
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0]),
        ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0]),
    ];
    const CORNERS: [([f32; 2], [f32; 2]); 4] = [
        ([-1.0, -1.0], [0.0, 1.0]),
        ([1.0, -1.0], [1.0, 1.0]),
        ([1.0, 1.0], [1.0, 0.0]),
        ([-1.0, 1.0], [0.0, 0.0]),
    ];

    let mut mesh = MeshData::default().with_label("cube");

    for (face, (n, t)) in FACES.iter().enumerate() {
        let b = cross(*n, *t);
        for (corner, uv) in CORNERS {
            let position = std::array::from_fn(|axis| {
                (n[axis] + corner[0] * t[axis] + corner[1] * b[axis]) * half_extent
            });
            mesh.positions.push(position);
            mesh.normals.push(*n);
            mesh.uvs.push(uv);
            mesh.tangents.push([t[0], t[1], t[2], 1.0]);
        }
        let base = face as u32 * 4;
        mesh.indices
            .extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
    }

    mesh
}

fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_cube() {
        let mesh = generate_cube(0.5);
        assert_eq!(mesh.vertex_count(), 24);
        assert_eq!(mesh.index_count(), 36);
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn test_cube_extent() {
        let mesh = generate_cube(2.0);
        for p in &mesh.positions {
            for c in p {
                assert!((c.abs() - 2.0).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_cube_faces_wind_outward() {
        let mesh = generate_cube(1.0);
        for tri in mesh.indices.chunks(3) {
            let [a, b, c] = [0, 1, 2].map(|k| mesh.positions[tri[k] as usize]);
            let e1 = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
            let e2 = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
            let face_normal = cross(e1, e2);
            let n = mesh.normals[tri[0] as usize];
            let dot: f32 = (0..3).map(|i| face_normal[i] * n[i]).sum();
            assert!(dot > 0.0, "triangle {tri:?} winds inward");
        }
    }
}
