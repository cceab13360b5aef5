//! CPU-side mesh data and procedural generators.

mod data;
mod generators;

pub use data::MeshData;
pub use generators::generate_cube;
