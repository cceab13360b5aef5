use std::path::Path;

use crate::error::AssetError;
use crate::mesh::MeshData;

/// Load the first triangle mesh from a `.gltf` or `.glb` file.
pub fn load_mesh(path: impl AsRef<Path>) -> Result<MeshData, AssetError> {
    let path = path.as_ref();
    std::fs::metadata(path).map_err(|source| AssetError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let (document, buffers, _images) = gltf_dep::import(path)?;
    let mesh = first_triangle_mesh(&document, &buffers, &path.display().to_string())?;
    log::info!(
        "Loaded mesh {:?} from {}: {} vertices, {} indices",
        mesh.label,
        path.display(),
        mesh.vertex_count(),
        mesh.index_count()
    );
    Ok(mesh)
}

/// Load the first triangle mesh from an in-memory glTF document.
///
/// Buffers must be embedded (GLB binary chunk or data URIs).
pub fn load_mesh_from_slice(bytes: &[u8]) -> Result<MeshData, AssetError> {
    let (document, buffers, _images) = gltf_dep::import_slice(bytes)?;
    first_triangle_mesh(&document, &buffers, "<memory>")
}

fn first_triangle_mesh(
    document: &gltf_dep::Document,
    buffers: &[gltf_dep::buffer::Data],
    source_name: &str,
) -> Result<MeshData, AssetError> {
    for mesh in document.meshes() {
        for primitive in mesh.primitives() {
            if primitive.mode() != gltf_dep::mesh::Mode::Triangles {
                log::debug!(
                    "Skipping mesh {} primitive {}: mode {:?}",
                    mesh.index(),
                    primitive.index(),
                    primitive.mode()
                );
                continue;
            }

            let reader =
                primitive.reader(|buffer| buffers.get(buffer.index()).map(|d| d.0.as_slice()));

            let positions: Vec<[f32; 3]> = reader
                .read_positions()
                .ok_or(AssetError::MissingPositions {
                    mesh: mesh.index(),
                    primitive: primitive.index(),
                })?
                .collect();
            let count = positions.len();

            let normals = reader
                .read_normals()
                .map(|n| n.collect())
                .unwrap_or_else(|| vec![MeshData::DEFAULT_NORMAL; count]);
            let uvs = reader
                .read_tex_coords(0)
                .map(|t| t.into_f32().collect())
                .unwrap_or_else(|| vec![[0.0, 0.0]; count]);
            let tangents = reader
                .read_tangents()
                .map(|t| t.collect())
                .unwrap_or_else(|| vec![MeshData::DEFAULT_TANGENT; count]);
            let indices = reader
                .read_indices()
                .map(|i| i.into_u32().collect())
                .unwrap_or_else(|| (0..count as u32).collect());

            let data = MeshData {
                positions,
                normals,
                uvs,
                tangents,
                indices,
                label: mesh.name().map(String::from),
            };
            data.validate()?;
            return Ok(data);
        }
    }

    Err(AssetError::NoMesh(source_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base64(bytes: &[u8]) -> String {
        const TABLE: &[u8; 64] =
            b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
        let mut out = String::new();
        for chunk in bytes.chunks(3) {
            let b = [
                chunk[0],
                chunk.get(1).copied().unwrap_or(0),
                chunk.get(2).copied().unwrap_or(0),
            ];
            let n = (b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32;
            for i in 0..4 {
                if i <= chunk.len() {
                    out.push(TABLE[((n >> (18 - 6 * i)) & 63) as usize] as char);
                } else {
                    out.push('=');
                }
            }
        }
        out
    }

    /// A single triangle with positions and u16 indices only.
    fn triangle_document() -> String {
        let positions: [[f32; 3]; 3] = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let mut buffer: Vec<u8> = bytemuck::cast_slice(&positions).to_vec();
        buffer.extend_from_slice(bytemuck::cast_slice(&[0u16, 1, 2]));
        buffer.extend_from_slice(&[0, 0]);

        format!(
            r#"{{
  "asset": {{ "version": "2.0" }},
  "buffers": [{{ "byteLength": {len}, "uri": "data:application/octet-stream;base64,{data}" }}],
  "bufferViews": [
    {{ "buffer": 0, "byteOffset": 0, "byteLength": 36 }},
    {{ "buffer": 0, "byteOffset": 36, "byteLength": 6 }}
  ],
  "accessors": [
    {{ "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
       "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0] }},
    {{ "bufferView": 1, "componentType": 5123, "count": 3, "type": "SCALAR" }}
  ],
  "meshes": [{{ "name": "tri", "primitives": [{{ "attributes": {{ "POSITION": 0 }}, "indices": 1 }}] }}]
}}"#,
            len = buffer.len(),
            data = base64(&buffer)
        )
    }

    #[test]
    fn test_base64_padding() {
        assert_eq!(base64(b"M"), "TQ==");
        assert_eq!(base64(b"Ma"), "TWE=");
        assert_eq!(base64(b"Man"), "TWFu");
    }

    #[test]
    fn test_load_triangle_fills_defaults() {
        let mesh = load_mesh_from_slice(triangle_document().as_bytes()).unwrap();
        assert_eq!(mesh.label.as_deref(), Some("tri"));
        assert_eq!(mesh.vertex_count(), 3);
        assert_eq!(mesh.indices, vec![0, 1, 2]);
        assert_eq!(mesh.normals, vec![MeshData::DEFAULT_NORMAL; 3]);
        assert_eq!(mesh.tangents, vec![MeshData::DEFAULT_TANGENT; 3]);
        assert_eq!(mesh.uvs, vec![[0.0, 0.0]; 3]);
    }

    #[test]
    fn test_document_without_meshes() {
        let json = r#"{ "asset": { "version": "2.0" } }"#;
        let err = load_mesh_from_slice(json.as_bytes()).unwrap_err();
        assert!(matches!(err, AssetError::NoMesh(_)));
    }

    #[test]
    fn test_invalid_document() {
        let err = load_mesh_from_slice(b"not a gltf document").unwrap_err();
        assert!(matches!(err, AssetError::Gltf(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = load_mesh("definitely/not/here.glb").unwrap_err();
        assert!(matches!(err, AssetError::Io { .. }));
    }
}
