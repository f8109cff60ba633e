//! NIP-01 events: content addressing and BIP-340 Schnorr signatures.

use crate::keys::{KeyError, SigningIdentity};
use secp256k1::{schnorr, Message, Secp256k1, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Short text note.
pub const KIND_TEXT_NOTE: u16 = 1;

/// A signed event, serialized exactly as relays expect it on the wire.
///
/// There is no way to change a field after signing; a retried publish sends
/// the same value again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEvent {
    id: String,
    pubkey: String,
    created_at: u64,
    kind: u16,
    tags: Vec<Vec<String>>,
    content: String,
    sig: String,
}

impl SignedEvent {
    /// Lowercase hex sha256 of the canonical serialization.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pubkey(&self) -> &str {
        &self.pubkey
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn kind(&self) -> u16 {
        self.kind
    }

    pub fn tags(&self) -> &[Vec<String>] {
        &self.tags
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn sig(&self) -> &str {
        &self.sig
    }

    /// Recomputes the id and checks the signature against `pubkey`.
    pub fn verify(&self) -> Result<(), KeyError> {
        let digest = event_digest(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )?;
        if hex::encode(digest) != self.id {
            return Err(KeyError::InvalidSignature("id does not match content".into()));
        }

        let pubkey_bytes =
            hex::decode(&self.pubkey).map_err(|e| KeyError::InvalidPublicKey(e.to_string()))?;
        let pubkey = XOnlyPublicKey::from_slice(&pubkey_bytes)
            .map_err(|e| KeyError::InvalidPublicKey(e.to_string()))?;
        let sig_bytes =
            hex::decode(&self.sig).map_err(|e| KeyError::InvalidSignature(e.to_string()))?;
        let sig = schnorr::Signature::from_slice(&sig_bytes)
            .map_err(|e| KeyError::InvalidSignature(e.to_string()))?;

        Secp256k1::verification_only()
            .verify_schnorr(&sig, &Message::from_digest(digest), &pubkey)
            .map_err(|e| KeyError::InvalidSignature(e.to_string()))
    }
}

/// Signs a kind-1 text note with no tags.
///
/// Signing uses no auxiliary randomness, so the same identity, content and
/// timestamp always yield the same event.
pub fn sign_text_note(
    identity: &SigningIdentity,
    content: impl Into<String>,
    created_at: u64,
) -> Result<SignedEvent, KeyError> {
    sign_event(identity, KIND_TEXT_NOTE, Vec::new(), content.into(), created_at)
}

fn sign_event(
    identity: &SigningIdentity,
    kind: u16,
    tags: Vec<Vec<String>>,
    content: String,
    created_at: u64,
) -> Result<SignedEvent, KeyError> {
    let pubkey = identity.public_key_hex();
    let digest = event_digest(&pubkey, created_at, kind, &tags, &content)?;

    let secp = Secp256k1::signing_only();
    let sig = secp.sign_schnorr_no_aux_rand(&Message::from_digest(digest), identity.keypair());

    Ok(SignedEvent {
        id: hex::encode(digest),
        pubkey,
        created_at,
        kind,
        tags,
        content,
        sig: hex::encode(sig.serialize()),
    })
}

/// sha256 of `[0, pubkey, created_at, kind, tags, content]`.
fn event_digest(
    pubkey: &str,
    created_at: u64,
    kind: u16,
    tags: &[Vec<String>],
    content: &str,
) -> Result<[u8; 32], KeyError> {
    let canonical = serde_json::to_string(&(0, pubkey, created_at, kind, tags, content))
        .map_err(|e| KeyError::Serialization(e.to_string()))?;
    Ok(Sha256::digest(canonical.as_bytes()).into())
}
