use std::fmt;
use xsalsa20poly1305::aead::{Aead, KeyInit};
use xsalsa20poly1305::{Nonce, XSalsa20Poly1305};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;
/// Poly1305 tag, stored in front of the ciphertext.
pub const TAG_LEN: usize = 16;

/// Encryption mode name negotiated on the voice control socket.
pub const MODE_XSALSA20_POLY1305: &str = "xsalsa20_poly1305";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("secret key must be {KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),
    #[error("failed to encrypt packet")]
    Seal,
    #[error("failed to decrypt packet")]
    Open,
}

/// Symmetric packet encryption keyed by the session secret.
pub trait PacketCipher: Send + Sync {
    fn seal(&self, nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;
    fn open(&self, nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// NaCl secret box (XSalsa20-Poly1305).
pub struct SecretBox {
    cipher: XSalsa20Poly1305,
}

impl SecretBox {
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        let cipher = XSalsa20Poly1305::new_from_slice(key)
            .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
        Ok(Self { cipher })
    }
}

impl fmt::Debug for SecretBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretBox(<key>)")
    }
}

impl PacketCipher for SecretBox {
    fn seal(&self, nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.cipher.encrypt(Nonce::from_slice(nonce), plaintext).map_err(|_| CryptoError::Seal)
    }

    fn open(&self, nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.cipher.decrypt(Nonce::from_slice(nonce), ciphertext).map_err(|_| CryptoError::Open)
    }
}
