//! # VKNgine Core
//!
//! CPU-side asset collaborators: mesh and image decoding plus procedural
//! fallbacks used when no asset path is given.

pub mod error;
#[cfg(feature = "gltf")]
pub mod gltf;
pub mod mesh;
pub mod texture;

pub use error::AssetError;
pub use mesh::MeshData;
pub use texture::ImageData;

/// Core library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn init() {
    log::info!("VKNgine Core v{} initialized", VERSION);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
