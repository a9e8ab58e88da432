//! HKDF-only engine backed by *ring*.
//!
//! Deliberately supports a single primitive so the harness exercises its
//! partial-support paths, and so HKDF output can be cross-checked between
//! two independent implementations.

use crate::engine::{CryptoEngine, KeyHandle, KeyMaterial};
use crate::error::{EngineError, Result};
use crate::primitive::Primitive;
use ring::hkdf;
use ring::rand::{SecureRandom, SystemRandom};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

const HKDF_OKM_LEN: usize = 16;

struct OkmLen(usize);

impl hkdf::KeyType for OkmLen {
    fn len(&self) -> usize {
        self.0
    }
}

/// A `CryptoEngine` exposing only HKDF, via `ring::hkdf`.
pub struct RingEngine {
    name: String,
    allows_export: bool,
    rng: SystemRandom,
    keys: RwLock<HashMap<u64, Vec<u8>>>,
    next_slot: AtomicU64,
}

impl RingEngine {
    /// Create an engine with the given name and export policy.
    pub fn new(name: impl Into<String>, allows_export: bool) -> Self {
        Self {
            name: name.into(),
            allows_export,
            rng: SystemRandom::new(),
            keys: RwLock::new(HashMap::new()),
            next_slot: AtomicU64::new(1),
        }
    }

    fn store(&self, key: Vec<u8>) -> KeyHandle {
        let slot = self.next_slot.fetch_add(1, Ordering::Relaxed);
        self.keys
            .write()
            .expect("key registry lock poisoned")
            .insert(slot, key);
        KeyHandle::new(self.name.clone(), slot)
    }

    fn lookup(&self, handle: &KeyHandle) -> Result<Vec<u8>> {
        if handle.engine() != self.name {
            return Err(EngineError::UnknownKey {
                engine: self.name.clone(),
                handle: handle.slot(),
            });
        }
        self.keys
            .read()
            .expect("key registry lock poisoned")
            .get(&handle.slot())
            .cloned()
            .ok_or_else(|| EngineError::UnknownKey {
                engine: self.name.clone(),
                handle: handle.slot(),
            })
    }
}

impl CryptoEngine for RingEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn allows_export(&self) -> bool {
        self.allows_export
    }

    fn generate_key(&self, primitive: Primitive, key_size: usize) -> Result<KeyHandle> {
        if primitive != Primitive::Hkdf || key_size != 256 {
            return Err(EngineError::Unsupported {
                engine: self.name.clone(),
                primitive,
                key_size,
            });
        }
        let mut bytes = vec![0u8; 32];
        self.rng
            .fill(&mut bytes)
            .map_err(|_| EngineError::OperationFailed("ring RNG failure".to_string()))?;
        Ok(self.store(bytes))
    }

    fn export_key(&self, handle: &KeyHandle) -> Result<KeyMaterial> {
        if !self.allows_export {
            return Err(EngineError::ExportForbidden(self.name.clone()));
        }
        Ok(KeyMaterial::Secret(self.lookup(handle)?))
    }

    fn import_key(&self, primitive: Primitive, material: &KeyMaterial) -> Result<KeyHandle> {
        if primitive != Primitive::Hkdf {
            return Err(EngineError::Unsupported {
                engine: self.name.clone(),
                primitive,
                key_size: 0,
            });
        }
        match material {
            KeyMaterial::Secret(bytes) if bytes.len() == 32 => Ok(self.store(bytes.clone())),
            KeyMaterial::Secret(bytes) => Err(EngineError::KeyMaterialMismatch(format!(
                "HKDF key must be 32 bytes, got {}",
                bytes.len()
            ))),
            other => Err(EngineError::KeyMaterialMismatch(format!(
                "cannot import {other:?} for {primitive}"
            ))),
        }
    }

    fn execute(
        &self,
        primitive: Primitive,
        key: &KeyHandle,
        buffer: &[u8],
        iv: &[u8],
    ) -> Result<Vec<u8>> {
        if primitive != Primitive::Hkdf {
            return Err(EngineError::Unsupported {
                engine: self.name.clone(),
                primitive,
                key_size: 0,
            });
        }
        if !iv.is_empty() {
            return Err(EngineError::OperationFailed(
                "HKDF takes no IV".to_string(),
            ));
        }
        let prk_bytes = self.lookup(key)?;
        let prk = hkdf::Prk::new_less_safe(hkdf::HKDF_SHA256, &prk_bytes);
        let info = [buffer];
        let okm = prk
            .expand(&info, OkmLen(HKDF_OKM_LEN))
            .map_err(|_| EngineError::OperationFailed("HKDF expand failed".to_string()))?;
        let mut out = vec![0u8; HKDF_OKM_LEN];
        okm.fill(&mut out)
            .map_err(|_| EngineError::OperationFailed("HKDF fill failed".to_string()))?;
        Ok(out)
    }
}
