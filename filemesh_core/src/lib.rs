#![warn(clippy::all, clippy::pedantic, clippy::multiple_crate_versions)]

pub use filemesh_bits as bits;
pub use filemesh_mesh as mesh;
