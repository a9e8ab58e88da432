//! Interchangeable cryptographic engine abstraction for cipherbench.
//!
//! This crate defines the `CryptoEngine` capability contract consumed by
//! the job harness, the fixed primitive set under test, and the software
//! engine implementations used in place of vendor HSM drivers.

pub mod engine;
pub mod error;
pub mod primitive;
pub mod registry;
pub mod ring_engine;
pub mod software;

pub use engine::{CryptoEngine, KeyHandle, KeyMaterial};
pub use error::{EngineError, Result};
pub use primitive::Primitive;
pub use registry::{build_engines, Backend, EngineConfig};
pub use ring_engine::RingEngine;
pub use software::SoftwareEngine;
