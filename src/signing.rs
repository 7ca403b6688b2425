//! Signing Protocol - Marker Text, Payload Construction, Verification
//!
//! The signed hash covers the fully composed artifact (marker and logo
//! already applied), never the original input. The configured logo
//! identifier is bound into the payload so a signature minted for one
//! deployment cannot validate under another.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use crate::hashing::sha256_hex;
use crate::keys::KeyManager;

/// One signature per artifact, immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureRecord {
    pub payload_hash: String,
    pub signature: Vec<u8>,
}

/// Marker template stamped onto every artifact.
pub fn marker_text(fingerprint: &str) -> String {
    format!("provstamp key // {fingerprint} //")
}

/// Hash of the composed artifact bytes; this is what gets signed.
pub fn signed_hash(composed_bytes: &[u8]) -> String {
    sha256_hex(composed_bytes)
}

/// Deployment identity bytes followed by the hash hex, UTF-8.
pub fn signature_payload(identity: &[u8], signed_hash_hex: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(identity.len() + signed_hash_hex.len());
    payload.extend_from_slice(identity);
    payload.extend_from_slice(signed_hash_hex.as_bytes());
    payload
}

/// Sign a composed artifact: hash, bind identity, sign via the key
/// manager. Returns the signed hash alongside the record.
pub fn sign_artifact(
    keys: &KeyManager,
    identity: &[u8],
    composed_bytes: &[u8],
) -> (String, SignatureRecord) {
    let hash = signed_hash(composed_bytes);
    let payload = signature_payload(identity, &hash);
    let record = keys.sign(&payload);
    (hash, record)
}

/// Symmetric verification; the publish flow never calls this but the
/// audit tooling does.
pub fn verify(key: &VerifyingKey, payload: &[u8], record: &SignatureRecord) -> bool {
    if record.payload_hash != sha256_hex(payload) {
        return false;
    }
    let bytes: [u8; 64] = match record.signature.as_slice().try_into() {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    key.verify(payload, &Signature::from_bytes(&bytes)).is_ok()
}
