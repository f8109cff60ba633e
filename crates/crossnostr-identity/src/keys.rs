//! Key material for channel identities.
//!
//! Keys travel between the operator and the bridge as NIP-19 bech32 strings
//! (`nsec1...` for secrets, `npub1...` for public keys). Decoding is an
//! explicit, typed step: anything that is not a well-formed 32-byte `nsec`
//! holding a valid secp256k1 scalar is rejected with a [`KeyError`].

use bech32::{Bech32, Hrp};
use secp256k1::{Keypair, Secp256k1, SecretKey, XOnlyPublicKey};
use std::fmt;
use thiserror::Error;

const NSEC_HRP: &str = "nsec";
const NPUB_HRP: &str = "npub";

/// Errors produced while decoding keys or signing events.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("bech32 decoding error: {0}")]
    Bech32(String),

    #[error("expected a '{expected}' key, got '{got}'")]
    WrongPrefix { expected: &'static str, got: String },

    #[error("expected 32 key bytes, got {0}")]
    InvalidLength(usize),

    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("bech32 encoding error: {0}")]
    Encode(String),

    #[error("event serialization error: {0}")]
    Serialization(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),
}

/// The key pair that authors events for one channel.
#[derive(Clone)]
pub struct SigningIdentity {
    keypair: Keypair,
    public_key: XOnlyPublicKey,
}

impl SigningIdentity {
    /// Builds an identity from raw secret key bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != 32 {
            return Err(KeyError::InvalidLength(bytes.len()));
        }
        let secret =
            SecretKey::from_slice(bytes).map_err(|e| KeyError::InvalidSecretKey(e.to_string()))?;
        let secp = Secp256k1::signing_only();
        let keypair = Keypair::from_secret_key(&secp, &secret);
        let (public_key, _parity) = keypair.x_only_public_key();
        Ok(Self {
            keypair,
            public_key,
        })
    }

    /// Lowercase hex of the x-only public key, as carried in event `pubkey`.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.serialize())
    }

    pub fn npub(&self) -> Result<String, KeyError> {
        encode(NPUB_HRP, &self.public_key.serialize())
    }

    pub fn nsec(&self) -> Result<String, KeyError> {
        encode(NSEC_HRP, &self.keypair.secret_bytes())
    }

    pub(crate) fn keypair(&self) -> &Keypair {
        &self.keypair
    }
}

impl PartialEq for SigningIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.keypair.secret_bytes() == other.keypair.secret_bytes()
    }
}

impl Eq for SigningIdentity {}

impl fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("public_key", &self.public_key_hex())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Decodes a bech32 `nsec1...` string into a signing identity.
///
/// Surrounding whitespace is ignored.
///
/// # Errors
///
/// Returns [`KeyError::Bech32`] for malformed strings,
/// [`KeyError::WrongPrefix`] for any other NIP-19 entity (e.g. an `npub`),
/// [`KeyError::InvalidLength`] when the payload is not 32 bytes, and
/// [`KeyError::InvalidSecretKey`] when the bytes are not a valid scalar.
pub fn decode_nsec(nsec: &str) -> Result<SigningIdentity, KeyError> {
    let bytes = decode(NSEC_HRP, nsec.trim())?;
    SigningIdentity::from_secret_bytes(&bytes)
}

fn decode(expected: &'static str, encoded: &str) -> Result<Vec<u8>, KeyError> {
    let (hrp, data) = bech32::decode(encoded).map_err(|e| KeyError::Bech32(e.to_string()))?;
    if hrp.to_lowercase() != expected {
        return Err(KeyError::WrongPrefix {
            expected,
            got: hrp.to_string(),
        });
    }
    if data.len() != 32 {
        return Err(KeyError::InvalidLength(data.len()));
    }
    Ok(data)
}

fn encode(hrp: &str, data: &[u8; 32]) -> Result<String, KeyError> {
    let hrp = Hrp::parse(hrp).map_err(|e| KeyError::Encode(e.to_string()))?;
    bech32::encode::<Bech32>(hrp, data).map_err(|e| KeyError::Encode(e.to_string()))
}
