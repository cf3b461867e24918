//! Ed25519 implementation of `MessageSigner`.

use crate::domain::errors::DispatchError;
use crate::ports::outbound::MessageSigner;
use shared_crypto::Ed25519KeyPair;
use shared_types::PeerId;

/// Signs with an in-process ed25519 key; the public key is the peer ID.
pub struct KeyPairSigner {
    keypair: Ed25519KeyPair,
}

impl KeyPairSigner {
    pub fn new(keypair: Ed25519KeyPair) -> Self {
        Self { keypair }
    }

    /// Deterministic signer, handy for fixtures.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::new(Ed25519KeyPair::from_seed(seed))
    }

    pub fn peer_id(&self) -> PeerId {
        PeerId(*self.keypair.public_key().as_bytes())
    }
}

impl MessageSigner for KeyPairSigner {
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, DispatchError> {
        Ok(self.keypair.sign(data).as_bytes().to_vec())
    }
}
