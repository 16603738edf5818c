//! Material definition.

use std::sync::{Arc, Weak};

use crate::device::GraphicsDevice;
use crate::draw::DrawPass;

/// Which part of the pipeline a material renders in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MaterialDomain {
    /// Regular mesh surface.
    #[default]
    Surface,
    PostProcess,
    Decal,
    Gui,
    Terrain,
    Particle,
}

/// Descriptor for creating a material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterialDescriptor {
    /// Optional label for debugging.
    pub label: Option<String>,
    pub domain: MaterialDomain,
    /// Passes this material can be drawn in.
    pub draw_modes: DrawPass,
}

impl Default for MaterialDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            domain: MaterialDomain::Surface,
            draw_modes: DrawPass::DEFAULT,
        }
    }
}

impl MaterialDescriptor {
    pub fn new(domain: MaterialDomain) -> Self {
        Self {
            domain,
            ..Default::default()
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the draw passes.
    pub fn with_draw_modes(mut self, draw_modes: DrawPass) -> Self {
        self.draw_modes = draw_modes;
        self
    }
}

/// A material that meshes can be drawn with.
///
/// Created by [`GraphicsDevice::create_material`].
pub struct Material {
    device: Weak<GraphicsDevice>,
    descriptor: MaterialDescriptor,
}

impl Material {
    /// Create a new material (called by GraphicsDevice).
    pub(crate) fn new(device: Weak<GraphicsDevice>, descriptor: MaterialDescriptor) -> Self {
        Self { device, descriptor }
    }

    /// Get the parent device, if it still exists.
    pub fn device(&self) -> Option<Arc<GraphicsDevice>> {
        self.device.upgrade()
    }

    /// Get the material descriptor.
    pub fn descriptor(&self) -> &MaterialDescriptor {
        &self.descriptor
    }

    /// Get the material label, if set.
    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    pub fn domain(&self) -> MaterialDomain {
        self.descriptor.domain
    }

    /// Whether this material can be used on mesh surfaces.
    pub fn is_surface(&self) -> bool {
        self.descriptor.domain == MaterialDomain::Surface
    }

    pub fn draw_modes(&self) -> DrawPass {
        self.descriptor.draw_modes
    }
}

impl std::fmt::Debug for Material {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Material")
            .field("label", &self.descriptor.label)
            .field("domain", &self.descriptor.domain)
            .field("draw_modes", &self.descriptor.draw_modes)
            .finish()
    }
}

static_assertions::assert_impl_all!(Material: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surface_detection() {
        let m = Material::new(Weak::new(), MaterialDescriptor::new(MaterialDomain::Surface));
        assert!(m.is_surface());
        let m = Material::new(Weak::new(), MaterialDescriptor::new(MaterialDomain::Decal));
        assert!(!m.is_surface());
    }
}
