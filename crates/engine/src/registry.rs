//! Engine set construction from configuration.
//!
//! Backends are resolved once at process start by a registry keyed on the
//! backend name; the harness core never inspects a concrete engine type
//! afterwards.

use crate::engine::CryptoEngine;
use crate::error::{EngineError, Result};
use crate::ring_engine::RingEngine;
use crate::software::SoftwareEngine;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

/// Backend selector for one configured engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    /// Full primitive set via the RustCrypto crates.
    Rustcrypto,
    /// HKDF only, via *ring*.
    Ring,
}

/// Declaration of one engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Unique engine name.
    pub name: String,
    /// Which backend implements this engine.
    pub backend: Backend,
    /// Whether raw key material may leave this engine.
    #[serde(default)]
    pub allows_export: bool,
}

/// Build the engine set for a process from its configuration.
///
/// Fails on duplicate names; an empty configuration is also rejected
/// since no job can run without engines.
pub fn build_engines(configs: &[EngineConfig]) -> Result<Vec<Arc<dyn CryptoEngine>>> {
    if configs.is_empty() {
        return Err(EngineError::Config("no engines configured".to_string()));
    }

    let mut seen = HashSet::new();
    let mut engines: Vec<Arc<dyn CryptoEngine>> = Vec::with_capacity(configs.len());
    for config in configs {
        if !seen.insert(config.name.clone()) {
            return Err(EngineError::Config(format!(
                "duplicate engine name: {}",
                config.name
            )));
        }
        let engine: Arc<dyn CryptoEngine> = match config.backend {
            Backend::Rustcrypto => {
                Arc::new(SoftwareEngine::new(config.name.clone(), config.allows_export))
            }
            Backend::Ring => Arc::new(RingEngine::new(config.name.clone(), config.allows_export)),
        };
        info!(
            engine = %config.name,
            backend = ?config.backend,
            allows_export = config.allows_export,
            "initialized engine"
        );
        engines.push(engine);
    }
    Ok(engines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_engines() {
        let configs = vec![
            EngineConfig {
                name: "soft".to_string(),
                backend: Backend::Rustcrypto,
                allows_export: true,
            },
            EngineConfig {
                name: "ring".to_string(),
                backend: Backend::Ring,
                allows_export: false,
            },
        ];
        let engines = build_engines(&configs).unwrap();
        assert_eq!(engines.len(), 2);
        assert_eq!(engines[0].name(), "soft");
        assert!(engines[0].allows_export());
        assert!(!engines[1].allows_export());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let config = EngineConfig {
            name: "dup".to_string(),
            backend: Backend::Rustcrypto,
            allows_export: true,
        };
        let err = build_engines(&[config.clone(), config]).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_empty_config_rejected() {
        assert!(matches!(build_engines(&[]), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_backend_serde() {
        let toml_str = r#"
            name = "hsm-stand-in"
            backend = "ring"
            allows_export = false
        "#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.backend, Backend::Ring);
    }
}
