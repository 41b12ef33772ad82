// Artifact cache
// Typed node outputs and their durable per-archive store

pub mod artifact;
pub mod store;

pub use artifact::{Artifact, ArtifactStatus, ArtifactValue, Encoding};
pub use store::ArtifactCache;
