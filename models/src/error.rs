//! Error types for model assets and cloth.

use redlilium_graphics::GraphicsError;
use thiserror::Error;

/// Errors raised while loading, streaming or mutating model assets.
#[derive(Debug, Error)]
pub enum AssetError {
    /// A required chunk is not present in the asset storage.
    #[error("missing data chunk {0}")]
    MissingDataChunk(usize),
    /// The stored data is corrupted or has an unsupported version.
    #[error("invalid data: {0}")]
    InvalidData(String),
    /// Creating a GPU resource failed.
    #[error("failed: {0}")]
    Failed(String),
    /// The asset that owned a task was destroyed before the task ran.
    #[error("missing resources")]
    MissingResources,
    /// The operation is not allowed in the current state (non-virtual asset, main thread).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error(transparent)]
    Graphics(#[from] GraphicsError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AssetError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidData(msg.into())
    }
}

pub type AssetResult<T> = Result<T, AssetError>;

/// Errors raised while building a cloth.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClothError {
    /// The bound mesh is not loaded or has no CPU-readable data.
    #[error("cloth mesh data is not available")]
    MissingMeshData,
    /// The referenced LOD or mesh index does not exist.
    #[error("cloth references missing mesh (lod {lod_index}, mesh {mesh_index})")]
    InvalidMesh { lod_index: u8, mesh_index: u16 },
    /// Every vertex is painted as fixed.
    #[error("all cloth vertices are fixed")]
    AllFixed,
    /// Triangles have no area.
    #[error("cloth mesh is degenerate")]
    DegenerateMesh,
    /// The physics backend refused the cloth.
    #[error("cloth backend error: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graphics_errors_convert() {
        let err: AssetError = GraphicsError::OutOfMemory.into();
        assert_eq!(err.to_string(), "out of GPU memory");
        assert_eq!(
            AssetError::MissingDataChunk(0).to_string(),
            "missing data chunk 0"
        );
    }
}
