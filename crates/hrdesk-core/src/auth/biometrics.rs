//! Biometric capability.
//!
//! The session store only needs "prompt the user and tell me whether it
//! worked". Hosts with a fingerprint/face API provide their own
//! implementation; everything else gets `NoBiometrics`.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BiometricError {
    #[error("Biometrics are not available on this device")]
    Unavailable,

    #[error("Biometric prompt cancelled")]
    Cancelled,

    #[error("Biometric check failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait Biometrics: Send + Sync {
    fn is_available(&self) -> bool;

    /// Show the platform prompt with `reason`; `Ok` only on a positive match.
    async fn authenticate(&self, reason: &str) -> Result<(), BiometricError>;
}

/// Always-unavailable implementation
pub struct NoBiometrics;

#[async_trait]
impl Biometrics for NoBiometrics {
    fn is_available(&self) -> bool {
        false
    }

    async fn authenticate(&self, _reason: &str) -> Result<(), BiometricError> {
        Err(BiometricError::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_biometrics_always_fails() {
        let bio = NoBiometrics;
        assert!(!bio.is_available());
        assert_eq!(bio.authenticate("Unlock").await, Err(BiometricError::Unavailable));
    }
}
