//! Vertex layouts for model meshes.
//!
//! Vertex layouts are wrapped in `Arc` and interned, so there is exactly one
//! object per distinct element list. This enables fast pointer comparison
//! for batching.

mod layout;

pub use layout::{MAX_VS_ELEMENTS, VertexAttribute, VertexAttributeSemantic, VertexLayout};
