//! Stellar strkeys and ed25519 signing keys

use ed25519_dalek::{Signer, SigningKey};
use stellar_strkey::ed25519::{PrivateKey, PublicKey};

use crate::error::ExecutionError;

/// Keeps secrets out of error messages and logs
fn redact(strkey: &str) -> String {
    if strkey.starts_with('S') {
        format!("{}…", strkey.chars().take(5).collect::<String>())
    } else {
        strkey.to_string()
    }
}

pub fn decode_account_id(account_id: &str) -> Result<[u8; 32], ExecutionError> {
    PublicKey::from_string(account_id)
        .map(|key| key.0)
        .map_err(|_| ExecutionError::InvalidKey(redact(account_id)))
}

pub fn encode_account_id(key: &[u8; 32]) -> String {
    PublicKey(*key).to_string()
}

#[cfg(test)]
pub fn encode_seed(seed: &[u8; 32]) -> String {
    PrivateKey(*seed).to_string()
}

/// Source or fee-payer keys for signing
#[derive(Clone)]
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    pub fn from_secret(seed: &str) -> Result<Self, ExecutionError> {
        PrivateKey::from_string(seed)
            .map(|key| Self::from_seed_bytes(key.0))
            .map_err(|_| ExecutionError::InvalidKey(redact(seed)))
    }

    pub fn from_seed_bytes(seed: [u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(&seed),
        }
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }

    pub fn account_id(&self) -> String {
        encode_account_id(&self.public_key())
    }

    /// Last four bytes of the public key, as used in decorated signatures
    pub fn hint(&self) -> [u8; 4] {
        let pk = self.public_key();
        [pk[28], pk[29], pk[30], pk[31]]
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("account_id", &self.account_id())
            .finish()
    }
}
