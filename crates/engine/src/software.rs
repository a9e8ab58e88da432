//! Software engine backed by the RustCrypto crates.
//!
//! Supports the full primitive set: AES-CBC/PKCS7 (`aes` + `cbc`),
//! HKDF-Expand over HMAC-SHA256 (`hkdf` + `sha2`) and RSA-OAEP-SHA1
//! (`rsa`). Keys live in an internal registry behind a `RwLock`; the
//! lock is only write-contended during the pre-worker key-generation
//! phase, after which every access is a read.

use crate::engine::{CryptoEngine, KeyHandle, KeyMaterial};
use crate::error::{EngineError, Result};
use crate::primitive::Primitive;
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::{Aes128, Aes256};
use hkdf::Hkdf;
use rand::RngCore;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rsa::{Oaep, RsaPrivateKey};
use sha1::Sha1;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tracing::debug;

/// HKDF output length in bytes, matching the derived-key convention of
/// the correctness matrix.
const HKDF_OKM_LEN: usize = 16;

enum EngineKey {
    Aes(Vec<u8>),
    Hmac(Vec<u8>),
    Rsa(Box<RsaPrivateKey>),
}

/// A `CryptoEngine` over in-process software implementations.
pub struct SoftwareEngine {
    name: String,
    allows_export: bool,
    keys: RwLock<HashMap<u64, EngineKey>>,
    next_slot: AtomicU64,
}

impl SoftwareEngine {
    /// Create an engine with the given name and export policy.
    pub fn new(name: impl Into<String>, allows_export: bool) -> Self {
        Self {
            name: name.into(),
            allows_export,
            keys: RwLock::new(HashMap::new()),
            next_slot: AtomicU64::new(1),
        }
    }

    fn store(&self, key: EngineKey) -> KeyHandle {
        let slot = self.next_slot.fetch_add(1, Ordering::Relaxed);
        self.keys
            .write()
            .expect("key registry lock poisoned")
            .insert(slot, key);
        debug!(engine = %self.name, slot, "stored key");
        KeyHandle::new(self.name.clone(), slot)
    }

    fn unsupported(&self, primitive: Primitive, key_size: usize) -> EngineError {
        EngineError::Unsupported {
            engine: self.name.clone(),
            primitive,
            key_size,
        }
    }

    fn with_key<T>(&self, handle: &KeyHandle, f: impl FnOnce(&EngineKey) -> Result<T>) -> Result<T> {
        if handle.engine() != self.name {
            return Err(EngineError::UnknownKey {
                engine: self.name.clone(),
                handle: handle.slot(),
            });
        }
        let keys = self.keys.read().expect("key registry lock poisoned");
        match keys.get(&handle.slot()) {
            Some(key) => f(key),
            None => Err(EngineError::UnknownKey {
                engine: self.name.clone(),
                handle: handle.slot(),
            }),
        }
    }

    fn aes_cbc_encrypt(key: &[u8], buffer: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
        match key.len() {
            16 => cbc::Encryptor::<Aes128>::new_from_slices(key, iv)
                .map(|c| c.encrypt_padded_vec_mut::<Pkcs7>(buffer))
                .map_err(|e| EngineError::OperationFailed(e.to_string())),
            32 => cbc::Encryptor::<Aes256>::new_from_slices(key, iv)
                .map(|c| c.encrypt_padded_vec_mut::<Pkcs7>(buffer))
                .map_err(|e| EngineError::OperationFailed(e.to_string())),
            n => Err(EngineError::OperationFailed(format!(
                "unexpected AES key length {n}"
            ))),
        }
    }

    fn aes_cbc_decrypt(key: &[u8], buffer: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
        let unpad_err = |e: aes::cipher::block_padding::UnpadError| {
            EngineError::OperationFailed(format!("bad padding: {e}"))
        };
        match key.len() {
            16 => cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
                .map_err(|e| EngineError::OperationFailed(e.to_string()))?
                .decrypt_padded_vec_mut::<Pkcs7>(buffer)
                .map_err(unpad_err),
            32 => cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
                .map_err(|e| EngineError::OperationFailed(e.to_string()))?
                .decrypt_padded_vec_mut::<Pkcs7>(buffer)
                .map_err(unpad_err),
            n => Err(EngineError::OperationFailed(format!(
                "unexpected AES key length {n}"
            ))),
        }
    }

    fn hkdf_expand(key: &[u8], info: &[u8]) -> Result<Vec<u8>> {
        let hk = Hkdf::<Sha256>::from_prk(key)
            .map_err(|e| EngineError::OperationFailed(format!("bad HKDF key: {e}")))?;
        let mut okm = vec![0u8; HKDF_OKM_LEN];
        hk.expand(info, &mut okm)
            .map_err(|e| EngineError::OperationFailed(format!("HKDF expand: {e}")))?;
        Ok(okm)
    }

    fn check_iv(primitive: Primitive, iv: &[u8]) -> Result<()> {
        if iv.len() != primitive.iv_len() {
            return Err(EngineError::OperationFailed(format!(
                "{} expects a {}-byte IV, got {}",
                primitive,
                primitive.iv_len(),
                iv.len()
            )));
        }
        Ok(())
    }
}

impl CryptoEngine for SoftwareEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn allows_export(&self) -> bool {
        self.allows_export
    }

    fn generate_key(&self, primitive: Primitive, key_size: usize) -> Result<KeyHandle> {
        let key = match primitive {
            Primitive::AesCbcEnc | Primitive::AesCbcDec => {
                if key_size != 128 && key_size != 256 {
                    return Err(self.unsupported(primitive, key_size));
                }
                let mut bytes = vec![0u8; key_size / 8];
                rand::thread_rng().fill_bytes(&mut bytes);
                EngineKey::Aes(bytes)
            }
            Primitive::Hkdf => {
                // The PRK must be exactly one HMAC-SHA256 block of entropy.
                if key_size != 256 {
                    return Err(self.unsupported(primitive, key_size));
                }
                let mut bytes = vec![0u8; 32];
                rand::thread_rng().fill_bytes(&mut bytes);
                EngineKey::Hmac(bytes)
            }
            Primitive::RsaEnc | Primitive::RsaDec => {
                if key_size != 1024 && key_size != 2048 {
                    return Err(self.unsupported(primitive, key_size));
                }
                let private = RsaPrivateKey::new(&mut rand::thread_rng(), key_size)
                    .map_err(|e| EngineError::OperationFailed(format!("RSA keygen: {e}")))?;
                EngineKey::Rsa(Box::new(private))
            }
        };
        Ok(self.store(key))
    }

    fn export_key(&self, handle: &KeyHandle) -> Result<KeyMaterial> {
        if !self.allows_export {
            return Err(EngineError::ExportForbidden(self.name.clone()));
        }
        self.with_key(handle, |key| match key {
            EngineKey::Aes(bytes) | EngineKey::Hmac(bytes) => {
                Ok(KeyMaterial::Secret(bytes.clone()))
            }
            EngineKey::Rsa(private) => {
                let der = private
                    .to_pkcs8_der()
                    .map_err(|e| EngineError::OperationFailed(format!("PKCS#8 encode: {e}")))?;
                Ok(KeyMaterial::RsaPkcs8Der(der.as_bytes().to_vec()))
            }
        })
    }

    fn import_key(&self, primitive: Primitive, material: &KeyMaterial) -> Result<KeyHandle> {
        let key = match (primitive, material) {
            (Primitive::AesCbcEnc | Primitive::AesCbcDec, KeyMaterial::Secret(bytes)) => {
                if bytes.len() != 16 && bytes.len() != 32 {
                    return Err(EngineError::KeyMaterialMismatch(format!(
                        "AES key must be 16 or 32 bytes, got {}",
                        bytes.len()
                    )));
                }
                EngineKey::Aes(bytes.clone())
            }
            (Primitive::Hkdf, KeyMaterial::Secret(bytes)) => {
                if bytes.len() != 32 {
                    return Err(EngineError::KeyMaterialMismatch(format!(
                        "HKDF key must be 32 bytes, got {}",
                        bytes.len()
                    )));
                }
                EngineKey::Hmac(bytes.clone())
            }
            (Primitive::RsaEnc | Primitive::RsaDec, KeyMaterial::RsaPkcs8Der(der)) => {
                let private = RsaPrivateKey::from_pkcs8_der(der)
                    .map_err(|e| EngineError::KeyMaterialMismatch(format!("PKCS#8 decode: {e}")))?;
                EngineKey::Rsa(Box::new(private))
            }
            (p, m) => {
                return Err(EngineError::KeyMaterialMismatch(format!(
                    "cannot import {m:?} for {p}"
                )))
            }
        };
        Ok(self.store(key))
    }

    fn execute(
        &self,
        primitive: Primitive,
        key: &KeyHandle,
        buffer: &[u8],
        iv: &[u8],
    ) -> Result<Vec<u8>> {
        Self::check_iv(primitive, iv)?;
        self.with_key(key, |key| match (primitive, key) {
            (Primitive::AesCbcEnc, EngineKey::Aes(k)) => Self::aes_cbc_encrypt(k, buffer, iv),
            (Primitive::AesCbcDec, EngineKey::Aes(k)) => Self::aes_cbc_decrypt(k, buffer, iv),
            (Primitive::Hkdf, EngineKey::Hmac(k)) => Self::hkdf_expand(k, buffer),
            (Primitive::RsaEnc, EngineKey::Rsa(private)) => private
                .to_public_key()
                .encrypt(&mut rand::thread_rng(), Oaep::new::<Sha1>(), buffer)
                .map_err(|e| EngineError::OperationFailed(format!("RSA encrypt: {e}"))),
            (Primitive::RsaDec, EngineKey::Rsa(private)) => private
                .decrypt(Oaep::new::<Sha1>(), buffer)
                .map_err(|e| EngineError::OperationFailed(format!("RSA decrypt: {e}"))),
            (p, _) => Err(EngineError::OperationFailed(format!(
                "key handle does not match primitive {p}"
            ))),
        })
    }
}
