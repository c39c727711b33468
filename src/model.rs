//! Core domain types shared across services.

use ed25519_dalek::{Signer, SigningKey};
use prost::Message;
use rand::rngs::OsRng;
use uuid::Uuid;

use crate::proto::common::{auth, Auth, PublicKey, Signature, UserId};

/// Generate a fresh random user identifier.
pub fn generate_user_id() -> UserId {
    UserId {
        value: Uuid::new_v4().as_bytes().to_vec(),
    }
}

/// Client signing key pair.
///
/// Signs request messages over their canonical serialization with the
/// auth field cleared; the signature travels in the `Auth` message.
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a fresh random key pair.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// The public half as a proto message.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            value: self.signing_key.verifying_key().to_bytes().to_vec(),
        }
    }

    /// Sign a message. The message must have its auth field cleared;
    /// the returned `Auth` is then installed into it.
    pub fn sign<M: Message>(&self, message: &M) -> Auth {
        let signature = self.signing_key.sign(&message.encode_to_vec());
        Auth {
            kind: Some(auth::Kind::KeyPair(auth::KeyPair {
                pub_key: Some(self.public_key()),
                signature: Some(Signature {
                    value: signature.to_bytes().to_vec(),
                }),
            })),
        }
    }
}
