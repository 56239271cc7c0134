//! Wallet encryption at rest: a passphrase-derived key (via scrypt)
//! encrypting the wallet's private key material (via AES-256-GCM) before it
//! ever reaches the snapshot file.

use crate::error::{Error, Result};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use scrypt::Params;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

const NONCE_LEN: usize = 12;
const SALT_LEN: usize = 16;

/// scrypt cost parameters. `log_n = 15` (N = 32768) is a reasonable balance
/// between brute-force resistance and unlock latency on commodity hardware;
/// lower it for tests where latency matters more than strength.
#[derive(Debug, Clone, Copy)]
pub struct ScryptCost {
    pub log_n: u8,
    pub r: u32,
    pub p: u32,
}

impl ScryptCost {
    pub const INTERACTIVE: ScryptCost = ScryptCost { log_n: 15, r: 8, p: 1 };
    /// Cheap parameters for tests: never use for real wallet material.
    pub const TEST_ONLY: ScryptCost = ScryptCost { log_n: 4, r: 8, p: 1 };

    fn params(self) -> Params {
        Params::new(self.log_n, self.r, self.p, 32).expect("valid scrypt parameters")
    }
}

/// An encrypted blob, ready to be embedded in a wallet snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub salt: [u8; SALT_LEN],
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

/// Derives a 32-byte AES key from `passphrase` and `salt` using scrypt.
fn derive_key(passphrase: &str, salt: &[u8], cost: ScryptCost) -> [u8; 32] {
    let mut key = [0u8; 32];
    scrypt::scrypt(passphrase.as_bytes(), salt, &cost.params(), &mut key).expect("scrypt output length matches key size");
    key
}

/// Encrypts `plaintext` (typically a serialized key list) under `passphrase`.
pub fn encrypt(plaintext: &[u8], passphrase: &str, cost: ScryptCost) -> EncryptedPayload {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);

    let mut key_bytes = derive_key(passphrase, &salt, cost);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
    key_bytes.zeroize();

    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher.encrypt(nonce, plaintext).expect("AES-GCM encryption cannot fail for valid input");

    EncryptedPayload { salt, nonce: nonce_bytes, ciphertext }
}

/// Decrypts a payload produced by [`encrypt`]. Returns
/// [`Error::BadPassphrase`] if the passphrase is wrong or the ciphertext was
/// tampered with (AES-GCM's authentication tag check fails identically in
/// both cases, by design).
pub fn decrypt(payload: &EncryptedPayload, passphrase: &str, cost: ScryptCost) -> Result<Vec<u8>> {
    let mut key_bytes = derive_key(passphrase, &payload.salt, cost);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
    key_bytes.zeroize();

    let nonce = Nonce::from_slice(&payload.nonce);
    cipher.decrypt(nonce, payload.ciphertext.as_ref()).map_err(|_| Error::BadPassphrase)
}
