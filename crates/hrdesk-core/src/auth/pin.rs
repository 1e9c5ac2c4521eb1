//! PIN hashing.
//!
//! PINs are stored as salted argon2 PHC strings. Entries written before
//! hashing was introduced hold the PIN itself; those still verify by exact
//! match and are reported as needing a rehash.

use anyhow::Result;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::RngCore;

/// Salt length in bytes
const SALT_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinCheck {
    Match,
    /// Matched a plaintext entry; store a fresh hash.
    MatchNeedsRehash,
    Mismatch,
}

impl PinCheck {
    pub fn is_match(self) -> bool {
        !matches!(self, PinCheck::Mismatch)
    }
}

pub fn hash_pin(pin: &str) -> Result<String> {
    let mut salt_bytes = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| anyhow::anyhow!("Failed to encode PIN salt: {}", e))?;

    let hash = Argon2::default()
        .hash_password(pin.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash PIN: {}", e))?;
    Ok(hash.to_string())
}

pub fn check_pin(pin: &str, stored: &str) -> PinCheck {
    match PasswordHash::new(stored) {
        Ok(parsed) => {
            if Argon2::default()
                .verify_password(pin.as_bytes(), &parsed)
                .is_ok()
            {
                PinCheck::Match
            } else {
                PinCheck::Mismatch
            }
        }
        Err(_) if stored == pin => PinCheck::MatchNeedsRehash,
        Err(_) => PinCheck::Mismatch,
    }
}
