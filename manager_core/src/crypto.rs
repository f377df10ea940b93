//! AEAD encryption of tokens/passwords at rest (C12). Keyed from a
//! per-install secret; plaintext never touches disk.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use chacha20poly1305::{
  AeadCore, ChaCha20Poly1305, KeyInit,
  aead::{Aead, OsRng},
};
use rand::RngCore;

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("install secret must decode to 32 bytes, got {0}")]
  BadKeyLength(usize),
  #[error("failed to decode ciphertext: {0}")]
  Decode(#[from] base64::DecodeError),
  #[error("ciphertext too short to contain a nonce")]
  Truncated,
  #[error("decryption failed (wrong key or corrupted ciphertext)")]
  Decrypt,
}

/// Symmetric key derived once from the install secret and shared by every
/// `Vault` consumer in the process.
#[derive(Clone)]
pub struct Vault {
  cipher: ChaCha20Poly1305,
}

impl Vault {
  /// `install_secret` is the raw 32-byte key, base64 (standard) encoded, as
  /// read from config/environment.
  pub fn from_base64_secret(install_secret: &str) -> Result<Self, Error> {
    let key_bytes = STANDARD.decode(install_secret)?;
    if key_bytes.len() != 32 {
      return Err(Error::BadKeyLength(key_bytes.len()));
    }
    Ok(Vault {
      cipher: ChaCha20Poly1305::new(key_bytes.as_slice().into()),
    })
  }

  /// Encrypts `plaintext`, returning `base64(nonce || ciphertext)`.
  pub fn encrypt(&self, plaintext: &str) -> Result<String, Error> {
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = self
      .cipher
      .encrypt(&nonce, plaintext.as_bytes())
      .map_err(|_| Error::Decrypt)?;
    let mut combined = Vec::with_capacity(nonce.len() + ciphertext.len());
    combined.extend_from_slice(&nonce);
    combined.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(combined))
  }

  pub fn decrypt(&self, encoded: &str) -> Result<String, Error> {
    let combined = STANDARD.decode(encoded)?;
    if combined.len() < 12 {
      return Err(Error::Truncated);
    }
    let (nonce, ciphertext) = combined.split_at(12);
    let plaintext = self
      .cipher
      .decrypt(nonce.into(), ciphertext)
      .map_err(|_| Error::Decrypt)?;
    String::from_utf8(plaintext).map_err(|_| Error::Decrypt)
  }
}

/// Generates a fresh 32-byte install secret, base64 (standard) encoded —
/// used when bootstrapping a new deployment with no existing secret on disk.
pub fn generate_install_secret() -> String {
  let mut bytes = [0u8; 32];
  rand::rngs::OsRng.fill_bytes(&mut bytes);
  STANDARD.encode(bytes)
}

/// 32 random bytes, URL-safe base64 — the service token shape (§4.6).
pub fn generate_service_token() -> String {
  let mut bytes = [0u8; 32];
  rand::rngs::OsRng.fill_bytes(&mut bytes);
  URL_SAFE_NO_PAD.encode(bytes)
}

/// 24 random bytes, URL-safe base64 — the admin password shape (§4.6).
pub fn generate_admin_password() -> String {
  let mut bytes = [0u8; 24];
  rand::rngs::OsRng.fill_bytes(&mut bytes);
  URL_SAFE_NO_PAD.encode(bytes)
}

/// Confusion-free alphabet for agent ID suffixes: excludes `0/O`, `I/l/1`.
const SAFE_CHARS: &[u8] = b"abcdefghjkmnpqrstuvwxyz23456789";

/// 6-character agent ID suffix drawn from [`SAFE_CHARS`] via a CSPRNG.
pub fn generate_agent_suffix() -> String {
  let mut rng = rand::rng();
  (0..6)
    .map(|_| {
      let idx = (rand::Rng::random::<u32>(&mut rng) as usize) % SAFE_CHARS.len();
      SAFE_CHARS[idx] as char
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_trips_plaintext() {
    let vault = Vault::from_base64_secret(&generate_install_secret()).unwrap();
    let ciphertext = vault.encrypt("super-secret-token").unwrap();
    assert_ne!(ciphertext, "super-secret-token");
    assert_eq!(vault.decrypt(&ciphertext).unwrap(), "super-secret-token");
  }

  #[test]
  fn rejects_wrong_key() {
    let vault_a = Vault::from_base64_secret(&generate_install_secret()).unwrap();
    let vault_b = Vault::from_base64_secret(&generate_install_secret()).unwrap();
    let ciphertext = vault_a.encrypt("token").unwrap();
    assert!(vault_b.decrypt(&ciphertext).is_err());
  }

  #[test]
  fn suffix_is_six_chars_from_safe_alphabet() {
    for _ in 0..1000 {
      let suffix = generate_agent_suffix();
      assert_eq!(suffix.len(), 6);
      assert!(suffix.chars().all(|c| SAFE_CHARS.contains(&(c as u8))));
    }
  }

  #[test]
  fn suffix_generation_has_low_collision_rate() {
    let mut seen = std::collections::HashSet::new();
    for _ in 0..10_000 {
      seen.insert(generate_agent_suffix());
    }
    assert!(seen.len() as f64 / 10_000.0 >= 0.99);
  }
}
