//! Authentication module for managing the user session and device unlock.
//!
//! This module provides:
//! - `SessionStore`: tokens, current user, PIN/biometric unlock state
//! - `SecretStore`: OS-level secret storage via keyring, one entry per secret
//! - `Biometrics`: capability interface for the platform biometric prompt
//!
//! Sessions survive restarts through the secret store; the unlock state
//! never does.

pub mod biometrics;
pub mod demo;
pub mod pin;
pub mod secrets;
pub mod session;

pub use biometrics::{BiometricError, Biometrics, NoBiometrics};
pub use secrets::{KeyringSecretStore, MemorySecretStore, SecretKey, SecretStore};
pub use session::{SessionState, SessionStore};
