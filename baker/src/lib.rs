//! Turns 3D models into LOD tier sets and the IIIF documents that describe them.
//!
//! Stages run in order: [`acquire`] resolves a source to a local file, [`lod`] writes the
//! tiers, [`thumbnail`] draws a preview, [`manifest`] describes one asset, [`collection`]
//! aggregates the manifests and [`normalize`] rewrites development URLs. [`pipeline`] wires
//! them together.

pub mod acquire;
pub mod collection;
pub mod lod;
pub mod manifest;
pub mod normalize;
pub mod pipeline;
pub mod thumbnail;
