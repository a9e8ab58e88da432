//! Cryptographic primitives under test.
//!
//! The primitive set is fixed: AES-CBC encryption/decryption, HKDF key
//! derivation and RSA-OAEP encryption/decryption. RSA sign/verify is a
//! planned extension and is intentionally absent from this enum.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One cryptographic operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Primitive {
    /// AES-CBC encryption with PKCS#7 padding
    AesCbcEnc,
    /// AES-CBC decryption with PKCS#7 padding
    AesCbcDec,
    /// HKDF-Expand (RFC 5869, HMAC-SHA256)
    Hkdf,
    /// RSA-OAEP (SHA-1) encryption
    RsaEnc,
    /// RSA-OAEP (SHA-1) decryption
    RsaDec,
}

impl Primitive {
    /// Every primitive, in catalog order.
    pub const ALL: [Primitive; 5] = [
        Primitive::AesCbcEnc,
        Primitive::AesCbcDec,
        Primitive::Hkdf,
        Primitive::RsaEnc,
        Primitive::RsaDec,
    ];

    /// Stable identifier used in catalogs, configs and report file names.
    pub fn id(&self) -> &'static str {
        match self {
            Primitive::AesCbcEnc => "aes-cbc-enc",
            Primitive::AesCbcDec => "aes-cbc-dec",
            Primitive::Hkdf => "hkdf",
            Primitive::RsaEnc => "rsa-enc",
            Primitive::RsaDec => "rsa-dec",
        }
    }

    /// Human-readable name for client UIs.
    pub fn display_name(&self) -> &'static str {
        match self {
            Primitive::AesCbcEnc => "AES/CBC/PKCS7 encryption",
            Primitive::AesCbcDec => "AES/CBC/PKCS7 decryption",
            Primitive::Hkdf => "HKDF",
            Primitive::RsaEnc => "RSA-OAEP encryption",
            Primitive::RsaDec => "RSA-OAEP decryption",
        }
    }

    /// IV/nonce length in bytes, 0 when the primitive takes no IV.
    pub fn iv_len(&self) -> usize {
        match self {
            Primitive::AesCbcEnc | Primitive::AesCbcDec => 16,
            Primitive::Hkdf | Primitive::RsaEnc | Primitive::RsaDec => 0,
        }
    }

    /// True for key-derivation primitives, where the correctness pair
    /// degenerates to (engine, engine).
    pub fn is_derivation(&self) -> bool {
        matches!(self, Primitive::Hkdf)
    }

    /// True for decrypt variants that need a pre-computed ciphertext.
    pub fn is_decrypt(&self) -> bool {
        matches!(self, Primitive::AesCbcDec | Primitive::RsaDec)
    }

    /// The encrypting counterpart of a decrypt variant.
    pub fn encrypt_counterpart(&self) -> Option<Primitive> {
        match self {
            Primitive::AesCbcDec => Some(Primitive::AesCbcEnc),
            Primitive::RsaDec => Some(Primitive::RsaEnc),
            _ => None,
        }
    }

    /// The decrypting counterpart of an encrypt variant.
    pub fn decrypt_counterpart(&self) -> Option<Primitive> {
        match self {
            Primitive::AesCbcEnc => Some(Primitive::AesCbcDec),
            Primitive::RsaEnc => Some(Primitive::RsaDec),
            _ => None,
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iv_lengths() {
        assert_eq!(Primitive::AesCbcEnc.iv_len(), 16);
        assert_eq!(Primitive::AesCbcDec.iv_len(), 16);
        assert_eq!(Primitive::Hkdf.iv_len(), 0);
        assert_eq!(Primitive::RsaEnc.iv_len(), 0);
    }

    #[test]
    fn test_encrypt_counterpart() {
        assert_eq!(
            Primitive::AesCbcDec.encrypt_counterpart(),
            Some(Primitive::AesCbcEnc)
        );
        assert_eq!(Primitive::RsaDec.encrypt_counterpart(), Some(Primitive::RsaEnc));
        assert_eq!(Primitive::AesCbcEnc.encrypt_counterpart(), None);
        assert_eq!(Primitive::Hkdf.encrypt_counterpart(), None);
    }

    #[test]
    fn test_serde_ids_match() {
        for p in Primitive::ALL {
            let json = serde_json::to_string(&p).unwrap();
            assert_eq!(json, format!("\"{}\"", p.id()));
            let back: Primitive = serde_json::from_str(&json).unwrap();
            assert_eq!(back, p);
        }
    }

    #[test]
    fn test_only_hkdf_is_derivation() {
        let derivations: Vec<_> = Primitive::ALL.iter().filter(|p| p.is_derivation()).collect();
        assert_eq!(derivations, vec![&Primitive::Hkdf]);
    }
}
