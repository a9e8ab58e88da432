//! Error types for engine construction and operation.

use crate::primitive::Primitive;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors produced by the `CryptoEngine` contract.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine does not support this primitive/key-size combination.
    #[error("engine {engine} does not support {primitive} with key size {key_size}")]
    Unsupported {
        /// Engine name
        engine: String,
        /// Requested primitive
        primitive: Primitive,
        /// Requested key size in bits
        key_size: usize,
    },

    /// Raw key material was requested from a non-exporting engine.
    #[error("engine {0} does not allow key export")]
    ExportForbidden(String),

    /// The supplied key handle does not belong to this engine.
    #[error("unknown key handle {handle} for engine {engine}")]
    UnknownKey {
        /// Engine name
        engine: String,
        /// Offending handle slot
        handle: u64,
    },

    /// Imported key material has the wrong shape for the primitive.
    #[error("key material mismatch: {0}")]
    KeyMaterialMismatch(String),

    /// An operation failed inside the backend (bad padding, wrong block
    /// size, oversized RSA payload). Callers treat this as an ordinary,
    /// recoverable operation failure.
    #[error("operation failed: {0}")]
    OperationFailed(String),

    /// Engine set construction failed (unknown backend, duplicate name).
    #[error("engine configuration error: {0}")]
    Config(String),
}
