pub mod asset;
pub mod config;
pub mod iiif;
pub mod lod;
pub mod tri_mesh;

pub use asset::Asset;
pub use config::BakerConfig;
pub use lod::{LodTier, LodTierSpec};
pub use tri_mesh::TriMesh;
