//! Error types for engine operations.
//!
//! Only structural problems become errors. Missing resources and bad
//! user input are handled in place: the operation returns `false`/`None`
//! and logs a warning, so a single click can never take the editor down.

use thiserror::Error;

use crate::bridge::BridgeError;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that reject a single engine operation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A layer kind name did not match any known kind.
    #[error("Unknown layer kind: {0}")]
    UnknownLayerKind(String),

    /// Layer not found in the registry.
    #[error("Layer not found: {0}")]
    LayerNotFound(String),

    /// Input that cannot be composited or restored at all
    /// (zero-sized or mis-sized surfaces, broken snapshot data).
    #[error("Structural error: {0}")]
    Structural(String),

    /// Checkpoint id unknown to the history manager.
    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(u64),

    /// The target layer's lock flags forbid the edit.
    #[error("Layer is locked: {0}")]
    Locked(String),

    /// The texture bridge refused or failed an update.
    #[error("Texture bridge error: {0}")]
    Bridge(#[from] BridgeError),
}
