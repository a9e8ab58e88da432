//! The `CryptoEngine` capability contract.
//!
//! An engine wraps one cryptographic backend (a software library today, an
//! HSM driver behind the same trait tomorrow). The harness core only ever
//! talks to this trait: it never inspects the concrete engine type.

use crate::error::Result;
use crate::primitive::Primitive;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Opaque reference to a key held inside one engine's registry.
///
/// Handles are only meaningful to the engine that issued them; passing a
/// handle to a different engine is an `UnknownKey` error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyHandle {
    engine: String,
    slot: u64,
}

impl KeyHandle {
    pub(crate) fn new(engine: impl Into<String>, slot: u64) -> Self {
        Self {
            engine: engine.into(),
            slot,
        }
    }

    /// Name of the engine that issued this handle.
    pub fn engine(&self) -> &str {
        &self.engine
    }

    pub(crate) fn slot(&self) -> u64 {
        self.slot
    }
}

/// Raw key material exported from one engine for import into another.
///
/// Secret bytes are wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub enum KeyMaterial {
    /// Raw symmetric bytes (AES key or HMAC key).
    Secret(Vec<u8>),
    /// RSA private key, PKCS#8 DER encoded.
    RsaPkcs8Der(Vec<u8>),
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key bytes.
        match self {
            KeyMaterial::Secret(b) => write!(f, "KeyMaterial::Secret({} bytes)", b.len()),
            KeyMaterial::RsaPkcs8Der(b) => write!(f, "KeyMaterial::RsaPkcs8Der({} bytes)", b.len()),
        }
    }
}

/// Capability interface over one cryptographic backend.
///
/// Implementations must be safe for concurrent operation use once key
/// generation has completed; the harness generates and imports all keys
/// before the first worker starts.
pub trait CryptoEngine: Send + Sync {
    /// Unique engine name.
    fn name(&self) -> &str;

    /// Whether raw key material may be exported from this engine. The
    /// correctness matrix needs at least one exporting engine per run so
    /// a single key can be shared across the whole set.
    fn allows_export(&self) -> bool;

    /// Generate a fresh key for `primitive` with `key_size` bits.
    ///
    /// Not idempotent: two calls produce two distinct keys. Fails with
    /// `Unsupported` when the engine cannot service the combination.
    fn generate_key(&self, primitive: Primitive, key_size: usize) -> Result<KeyHandle>;

    /// Export the raw material behind `handle`. Fails with
    /// `ExportForbidden` unless `allows_export()` is true.
    fn export_key(&self, handle: &KeyHandle) -> Result<KeyMaterial>;

    /// Import key material generated elsewhere, returning a handle local
    /// to this engine.
    fn import_key(&self, primitive: Primitive, material: &KeyMaterial) -> Result<KeyHandle>;

    /// Perform one operation. `iv` must be exactly `primitive.iv_len()`
    /// bytes (empty when the primitive takes no IV). Failures are
    /// ordinary operation errors, never fatal to the harness.
    fn execute(
        &self,
        primitive: Primitive,
        key: &KeyHandle,
        buffer: &[u8],
        iv: &[u8],
    ) -> Result<Vec<u8>>;
}

impl std::fmt::Debug for dyn CryptoEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoEngine")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}
