//! Error types for asset decoding.

use std::path::PathBuf;

/// Errors surfaced while decoding a mesh or image asset.
#[derive(Debug)]
pub enum AssetError {
    /// The file could not be read.
    Io {
        /// Path that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse the glTF document.
    #[cfg(feature = "gltf")]
    Gltf(gltf_dep::Error),
    /// The named document contains no triangle primitive to load.
    NoMesh(String),
    /// A primitive is missing position data.
    MissingPositions {
        /// Mesh index in the document.
        mesh: usize,
        /// Primitive index within the mesh.
        primitive: usize,
    },
    /// Failed to decode an image.
    ImageDecode(String),
    /// Decoded data violates the mesh/image invariants.
    Malformed(String),
}

impl std::fmt::Display for AssetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "failed to read {}: {source}", path.display()),
            #[cfg(feature = "gltf")]
            Self::Gltf(e) => write!(f, "glTF parse error: {e}"),
            Self::NoMesh(name) => write!(f, "{name} contains no triangle mesh"),
            Self::MissingPositions { mesh, primitive } => {
                write!(
                    f,
                    "mesh {mesh} primitive {primitive} has no POSITION attribute"
                )
            }
            Self::ImageDecode(msg) => write!(f, "image decode error: {msg}"),
            Self::Malformed(msg) => write!(f, "malformed asset: {msg}"),
        }
    }
}

impl std::error::Error for AssetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            #[cfg(feature = "gltf")]
            Self::Gltf(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(feature = "gltf")]
impl From<gltf_dep::Error> for AssetError {
    fn from(e: gltf_dep::Error) -> Self {
        Self::Gltf(e)
    }
}

impl From<image::ImageError> for AssetError {
    fn from(e: image::ImageError) -> Self {
        Self::ImageDecode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_mentions_path() {
        let err = AssetError::Io {
            path: PathBuf::from("models/missing.glb"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        let text = err.to_string();
        assert!(text.contains("models/missing.glb"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_missing_positions_display() {
        let err = AssetError::MissingPositions {
            mesh: 2,
            primitive: 1,
        };
        assert_eq!(
            err.to_string(),
            "mesh 2 primitive 1 has no POSITION attribute"
        );
    }
}
