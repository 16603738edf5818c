//! # RedLilium Engine Core
//!
//! Math, bounding volumes and identity types shared by the graphics and
//! model crates.

pub mod bounds;
pub mod guid;
pub mod math;
pub mod thread;

pub use bounds::{BoundingBox, BoundingSphere, Ray};
pub use guid::Guid;
pub use math::Transform;

/// Core library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
