//! Materials as seen by model draw submission.
//!
//! A [`Material`] carries the domain and the set of draw passes it renders
//! in. Shaders and bindings belong to the renderer and are not modelled here.

mod material;

pub use material::{Material, MaterialDescriptor, MaterialDomain};
