//! glTF mesh loading.
//!
//! Only the first triangle-list primitive of a document is loaded. Missing
//! normals, texture coordinates and tangents are filled with defaults so the
//! result always satisfies [`MeshData::validate`](crate::mesh::MeshData::validate).

mod loader;

pub use loader::{load_mesh, load_mesh_from_slice};
