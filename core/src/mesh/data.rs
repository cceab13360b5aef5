//! Decoded triangle mesh.

use crate::error::AssetError;

/// A decoded triangle mesh with per-vertex attributes stored as separate
/// streams.
///
/// All attribute streams have the same length; `indices` is a triangle list
/// referencing those vertices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub uvs: Vec<[f32; 2]>,
    /// Tangent xyz plus handedness in w.
    pub tangents: Vec<[f32; 4]>,
    pub indices: Vec<u32>,
    pub label: Option<String>,
}

impl MeshData {
    /// Normal used when a source mesh has none.
    pub const DEFAULT_NORMAL: [f32; 3] = [0.0, 0.0, 1.0];
    /// Tangent used when a source mesh has none.
    pub const DEFAULT_TANGENT: [f32; 4] = [1.0, 0.0, 0.0, 1.0];

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    /// Check that every attribute stream matches the position count and
    /// that the index list is a valid triangle list.
    pub fn validate(&self) -> Result<(), AssetError> {
        let count = self.vertex_count();
        if count == 0 {
            return Err(AssetError::Malformed("mesh has no vertices".into()));
        }
        for (name, len) in [
            ("normals", self.normals.len()),
            ("uvs", self.uvs.len()),
            ("tangents", self.tangents.len()),
        ] {
            if len != count {
                return Err(AssetError::Malformed(format!(
                    "{name} stream has {len} entries, expected {count}"
                )));
            }
        }
        if self.indices.is_empty() || self.indices.len() % 3 != 0 {
            return Err(AssetError::Malformed(format!(
                "index count {} is not a non-empty triangle list",
                self.indices.len()
            )));
        }
        if let Some(&bad) = self.indices.iter().find(|&&i| i as usize >= count) {
            return Err(AssetError::Malformed(format!(
                "index {bad} out of range for {count} vertices"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn triangle() -> MeshData {
        MeshData {
            positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            normals: vec![MeshData::DEFAULT_NORMAL; 3],
            uvs: vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]],
            tangents: vec![MeshData::DEFAULT_TANGENT; 3],
            indices: vec![0, 1, 2],
            label: None,
        }
    }

    #[test]
    fn test_valid_triangle() {
        assert!(triangle().validate().is_ok());
    }

    #[test]
    fn test_mismatched_stream_rejected() {
        let mut mesh = triangle();
        mesh.uvs.pop();
        assert!(matches!(mesh.validate(), Err(AssetError::Malformed(_))));
    }

    #[rstest]
    #[case::out_of_range(vec![0, 1, 3])]
    #[case::partial_triangle(vec![0, 1])]
    #[case::empty(vec![])]
    fn test_bad_indices_rejected(#[case] indices: Vec<u32>) {
        let mut mesh = triangle();
        mesh.indices = indices;
        assert!(matches!(mesh.validate(), Err(AssetError::Malformed(_))));
    }
}
