//! Key management: a single EC keypair, and the small set of derived
//! identities (compressed public key, HASH160) the wallet's pools and
//! script builders key off of.
//!
//! This module does not implement hierarchical (BIP32/BIP39) derivation —
//! each [`EcKey`] is an independent keypair. A wallet that wants
//! hierarchical derivation generates its keys externally and imports them.

use rand::rngs::OsRng;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use spv_core::fingerprint::Hash160;
use spv_core::script::Script;
use zeroize::Zeroize;

/// A single secp256k1 keypair, always used in compressed public key form
/// (the only form modern standard scripts expect).
#[derive(Clone)]
pub struct EcKey {
    secret: SecretKey,
    public: PublicKey,
}

impl EcKey {
    /// Generates a new random keypair.
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let secret = SecretKey::new(&mut OsRng);
        let public = PublicKey::from_secret_key(&secp, &secret);
        EcKey { secret, public }
    }

    /// Reconstructs a keypair from a raw 32-byte secret.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, secp256k1::Error> {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(bytes)?;
        let public = PublicKey::from_secret_key(&secp, &secret);
        Ok(EcKey { secret, public })
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.secret_bytes()
    }

    /// The compressed (33-byte) public key encoding.
    pub fn public_key_bytes(&self) -> [u8; 33] {
        self.public.serialize()
    }

    pub fn hash160(&self) -> Hash160 {
        Hash160::hash(&self.public_key_bytes())
    }

    /// The standard pay-to-pubkey-hash script this key controls.
    pub fn p2pkh_script(&self) -> Script {
        Script::new_p2pkh(&self.hash160())
    }

    /// The standard pay-to-witness-pubkey-hash script this key controls.
    pub fn p2wpkh_script(&self) -> Script {
        Script::new_p2wpkh(&self.hash160())
    }

    /// Signs a 32-byte sighash, producing a low-S DER-encoded ECDSA
    /// signature (secp256k1's signing API enforces low-S by default).
    pub fn sign(&self, sighash: &[u8; 32]) -> Vec<u8> {
        let secp = Secp256k1::new();
        let message = Message::from_digest_slice(sighash).expect("32-byte sighash");
        let sig = secp.sign_ecdsa(&message, &self.secret);
        sig.serialize_der().to_vec()
    }

    pub fn verify(&self, sighash: &[u8; 32], der_signature: &[u8]) -> bool {
        let secp = Secp256k1::new();
        let Ok(message) = Message::from_digest_slice(sighash) else { return false };
        let Ok(sig) = secp256k1::ecdsa::Signature::from_der(der_signature) else { return false };
        secp.verify_ecdsa(&message, &sig, &self.public).is_ok()
    }
}

impl Drop for EcKey {
    fn drop(&mut self) {
        let mut bytes = self.secret.secret_bytes();
        bytes.zeroize();
    }
}

impl std::fmt::Debug for EcKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EcKey({})", hex::encode(self.public_key_bytes()))
    }
}
