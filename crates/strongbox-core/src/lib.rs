//! Strongbox Core - Encrypted credential vault engine
//!
//! This crate provides:
//! - PBKDF2-HMAC-SHA256 key derivation from the master passphrase
//! - AES-256-GCM encryption of the vault file
//! - An in-memory login store with automatic zeroization
//! - A non-blocking single-instance vault lock
//! - Random password generation
//! - `VaultSession`, the interface front ends call into

pub mod models;
pub mod crypto;
pub mod kdf;
pub mod storage;
pub mod generator;
pub mod session;
pub mod error;

pub use models::*;
pub use crypto::*;
pub use kdf::*;
pub use storage::*;
pub use generator::*;
pub use session::*;
pub use error::*;
